//! `fresh` binary entry point.

use std::process::ExitCode;

use clap::Parser;
use freshness_gate::cli_app::{Cli, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("fresh: {err}");
            ExitCode::from(2)
        }
    }
}
