//! Durable form of the ledger: an append-only JSON-lines log plus a small
//! tail pointer file.
//!
//! Every append writes one line and fsyncs it before the tail pointer is
//! replaced (write temp, fsync, rename). A crash between the two leaves the
//! log exactly one block ahead of the pointer, which load accepts. Any other
//! disagreement is reported, never papered over.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use memchr::memchr_iter;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::block::LedgerBlock;
use super::chain;
use crate::core::errors::{FgError, Result};

static HEX_DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("constant digest pattern"));

fn is_hex_digest(value: &str) -> bool {
    HEX_DIGEST.is_match(value)
}

/// Contents of `<log>.tail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailPointer {
    pub index: u64,
    pub hash: String,
    pub blocks: usize,
}

impl TailPointer {
    #[must_use]
    pub fn of(block: &LedgerBlock, blocks: usize) -> Self {
        Self {
            index: block.index,
            hash: block.hash.clone(),
            blocks,
        }
    }
}

/// How a log relates to its tail pointer after a successful load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    InSync,
    /// The last append reached the log but not the pointer.
    OneAhead,
    /// Log is empty and no pointer exists.
    Fresh,
}

/// A parsed line with its byte span in the log.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub block: LedgerBlock,
    pub end_offset: u64,
}

/// Result of scanning a log for its longest usable prefix.
#[derive(Debug, Clone)]
pub struct PrefixScan {
    pub blocks: Vec<LedgerBlock>,
    /// Byte length of the usable prefix.
    pub keep_bytes: u64,
    pub total_bytes: u64,
    pub total_lines: usize,
    pub problem: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogStore {
    path: PathBuf,
    tail_path: PathBuf,
}

impl LogStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tail = path.clone().into_os_string();
        tail.push(".tail");
        Self {
            path,
            tail_path: PathBuf::from(tail),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn tail_path(&self) -> &Path {
        &self.tail_path
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(FgError::io(&self.path, err)),
        }
    }

    /// Strict load: every line must parse and structurally fit, and the tail
    /// pointer must agree. Hash linkage is left to `verify`.
    pub fn load(&self) -> Result<(Vec<LedgerBlock>, TailState)> {
        let bytes = self.read_bytes()?;
        let lines = split_lines(&bytes);
        let mut blocks = Vec::with_capacity(lines.len());
        let mut consumed = 0usize;
        for (number, (start, end)) in lines.iter().copied().enumerate() {
            let block = parse_line(&bytes[start..end], blocks.len() as u64)
                .map_err(|details| FgError::corrupt(&self.path, number + 1, details))?;
            blocks.push(block);
            consumed = end + 1;
        }
        if consumed < bytes.len() {
            return Err(FgError::corrupt(
                &self.path,
                lines.len() + 1,
                "final line has no terminating newline (torn write)",
            ));
        }
        let state = self.check_tail(&blocks)?;
        Ok((blocks, state))
    }

    fn check_tail(&self, blocks: &[LedgerBlock]) -> Result<TailState> {
        let mismatch = |details: String| FgError::LedgerTailMismatch {
            path: self.tail_path.clone(),
            details,
        };
        let tail = self.read_tail()?;
        match (tail, blocks.last()) {
            (None, None) => Ok(TailState::Fresh),
            (None, Some(_)) if blocks.len() == 1 => Ok(TailState::OneAhead),
            (None, Some(_)) => Err(mismatch(format!(
                "tail pointer missing for a log of {} blocks",
                blocks.len()
            ))),
            (Some(tail), None) => Err(mismatch(format!(
                "tail pointer names {} blocks but the log is empty",
                tail.blocks
            ))),
            (Some(tail), Some(last)) => {
                if tail.blocks == blocks.len() && tail.hash == last.hash && tail.index == last.index
                {
                    Ok(TailState::InSync)
                } else if tail.blocks + 1 == blocks.len()
                    && tail.blocks > 0
                    && blocks[tail.blocks - 1].hash == tail.hash
                {
                    Ok(TailState::OneAhead)
                } else {
                    Err(mismatch(format!(
                        "pointer says {} blocks ending in {}, log has {} ending in {}",
                        tail.blocks,
                        tail.hash,
                        blocks.len(),
                        last.hash
                    )))
                }
            }
        }
    }

    pub fn read_tail(&self) -> Result<Option<TailPointer>> {
        match fs::read(&self.tail_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                FgError::LedgerTailMismatch {
                    path: self.tail_path.clone(),
                    details: format!("unreadable tail pointer: {err}"),
                }
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FgError::io(&self.tail_path, err)),
        }
    }

    /// Replace the tail pointer atomically.
    pub fn write_tail(&self, tail: &TailPointer) -> Result<()> {
        let encoded = serde_json::to_vec(tail)?;
        write_atomic(&self.tail_path, &encoded)
    }

    /// Append one block line and fsync it. On a failed write or sync the log
    /// is cut back to its previous length so no torn line survives.
    pub fn append(&self, block: &LedgerBlock) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| FgError::io(parent, err))?;
        }
        let mut line = serde_json::to_vec(block)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| FgError::io(&self.path, err))?;
        let start = file
            .metadata()
            .map_err(|err| FgError::io(&self.path, err))?
            .len();
        if let Err(err) = file.write_all(&line).and_then(|()| file.sync_all()) {
            let _ = file.set_len(start).and_then(|()| file.sync_all());
            return Err(FgError::io(&self.path, err));
        }
        Ok(())
    }

    /// Replace the whole log (import), then the pointer.
    pub fn rewrite(&self, blocks: &[LedgerBlock]) -> Result<()> {
        let mut encoded = Vec::new();
        for block in blocks {
            encoded.extend_from_slice(&serde_json::to_vec(block)?);
            encoded.push(b'\n');
        }
        write_atomic(&self.path, &encoded)?;
        match blocks.last() {
            Some(last) => self.write_tail(&TailPointer::of(last, blocks.len())),
            None => remove_if_present(&self.tail_path),
        }
    }

    /// Longest prefix that parses, is newline-terminated and hash-links.
    pub fn scan_prefix(&self) -> Result<PrefixScan> {
        let bytes = self.read_bytes()?;
        let lines = split_lines(&bytes);
        let mut parsed: Vec<LogLine> = Vec::new();
        let mut problem = None;
        for (number, (start, end)) in lines.iter().copied().enumerate() {
            match parse_line(&bytes[start..end], parsed.len() as u64) {
                Ok(block) => parsed.push(LogLine {
                    block,
                    end_offset: end as u64 + 1,
                }),
                Err(details) => {
                    problem = Some(format!("line {}: {details}", number + 1));
                    break;
                }
            }
        }
        let consumed = lines.last().map_or(0, |&(_, end)| end + 1);
        if problem.is_none() && consumed < bytes.len() {
            problem = Some("unterminated final line".to_string());
        }

        let blocks: Vec<LedgerBlock> = parsed.iter().map(|line| line.block.clone()).collect();
        let keep = chain::valid_prefix_len(&blocks);
        if problem.is_none() && keep < blocks.len() {
            problem = Some(format!("hash chain breaks at block {keep}"));
        }
        let keep_bytes = keep
            .checked_sub(1)
            .map_or(0, |last| parsed[last].end_offset);
        Ok(PrefixScan {
            blocks: blocks.into_iter().take(keep).collect(),
            keep_bytes,
            total_bytes: bytes.len() as u64,
            total_lines: lines.len() + usize::from(consumed < bytes.len()),
            problem,
        })
    }

    /// Cut the log to `keep_bytes` and reset the pointer to match.
    pub fn truncate_to(&self, keep_bytes: u64, blocks: &[LedgerBlock]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|err| FgError::io(&self.path, err))?;
        file.set_len(keep_bytes)
            .and_then(|()| file.sync_all())
            .map_err(|err| FgError::io(&self.path, err))?;
        match blocks.last() {
            Some(last) => self.write_tail(&TailPointer::of(last, blocks.len())),
            None => remove_if_present(&self.tail_path),
        }
    }
}

/// `(start, end)` of every newline-terminated line, newline excluded.
fn split_lines(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for newline in memchr_iter(b'\n', bytes) {
        spans.push((start, newline));
        start = newline + 1;
    }
    spans
}

fn parse_line(raw: &[u8], expected_index: u64) -> std::result::Result<LedgerBlock, String> {
    let block: LedgerBlock =
        serde_json::from_slice(raw).map_err(|err| format!("malformed block: {err}"))?;
    if block.index != expected_index {
        return Err(format!(
            "index {} found where {expected_index} was expected",
            block.index
        ));
    }
    if !is_hex_digest(&block.hash) {
        return Err(format!("hash {:?} is not a SHA-256 hex digest", block.hash));
    }
    if block.index > 0 && !is_hex_digest(&block.previous_hash) {
        return Err(format!(
            "previous_hash {:?} is not a SHA-256 hex digest",
            block.previous_hash
        ));
    }
    if !block.data.is_object() {
        return Err("block data is not an object".to_string());
    }
    Ok(block)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| FgError::io(parent, err))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    let mut tmp = File::create(&tmp_path).map_err(|err| FgError::io(&tmp_path, err))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.sync_all())
        .map_err(|err| FgError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        FgError::io(path, err)
    })
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FgError::io(path, err)),
    }
}
