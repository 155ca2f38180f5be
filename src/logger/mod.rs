//! Structured activity logging: JSONL append-only with graceful degradation.

pub mod jsonl;

pub use jsonl::{ActivityEvent, ActivitySink, JsonlLogger, Level, MemorySink, NullSink};
