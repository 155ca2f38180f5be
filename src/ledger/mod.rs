//! Single-writer, append-only, hash-linked decision ledger.
//!
//! The in-memory chain sits behind one mutex. `append` holds it across
//! read-last, hash, write, fsync and push, so two appends can never claim the
//! same predecessor.

#![allow(missing_docs)]

pub mod block;
pub mod chain;
pub mod store;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

pub use block::{LedgerBlock, compute_hash, now_timestamp, sha256_hex};
pub use chain::ChainReport;
pub use store::{LogStore, TailPointer, TailState};

use crate::core::errors::{FgError, Result};
use crate::logger::{ActivityEvent, ActivitySink};

/// Block count, head hash and validity in one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub total_blocks: usize,
    pub head_hash: String,
    pub is_valid: bool,
}

/// Outcome of [`Ledger::repair`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub kept_blocks: usize,
    pub dropped_lines: usize,
    pub truncated_bytes: u64,
    pub problem: Option<String>,
}

pub struct Ledger {
    store: LogStore,
    chain: Mutex<Vec<LedgerBlock>>,
    /// Set when the last pointer update failed; only touched under `chain`.
    tail_stale: AtomicBool,
    sink: Arc<dyn ActivitySink>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.store.path())
            .field("blocks", &self.chain.lock().len())
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Load the persisted chain, creating the genesis block if the log is
    /// empty. A malformed log is an error, never an empty chain.
    pub fn open(path: &Path, sink: Arc<dyn ActivitySink>) -> Result<Self> {
        let store = LogStore::new(path);
        let (mut blocks, state) = store.load()?;
        if blocks.is_empty() {
            let genesis = LedgerBlock::genesis(now_timestamp())?;
            store.append(&genesis)?;
            store.write_tail(&TailPointer::of(&genesis, 1))?;
            blocks.push(genesis);
        } else if state == TailState::OneAhead {
            if let Some(last) = blocks.last() {
                store.write_tail(&TailPointer::of(last, blocks.len()))?;
            }
        }
        sink.record(
            ActivityEvent::info("ledger.loaded")
                .with("path", store.path())
                .with("blocks", blocks.len())
                .with("tail_recovered", state == TailState::OneAhead),
        );
        Ok(Self {
            store,
            chain: Mutex::new(blocks),
            tail_stale: AtomicBool::new(false),
            sink,
        })
    }

    /// Like [`Ledger::open`], but seeds an empty log from an array-format file
    /// when one is given and exists.
    pub fn open_or_import(
        path: &Path,
        legacy: Option<&Path>,
        sink: Arc<dyn ActivitySink>,
    ) -> Result<Self> {
        let (existing, _) = LogStore::new(path).load()?;
        match legacy {
            Some(source) if existing.is_empty() && source.exists() => {
                Self::import(path, source, sink)
            }
            _ => Self::open(path, sink),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Hash-link `payload` onto the chain and persist it. `payload` must be a
    /// JSON object.
    ///
    /// Once the block line is durable the append has happened: a failed tail
    /// pointer update is logged and retried before the next append, which
    /// keeps the log at most one block ahead of its pointer.
    pub fn append(&self, payload: Value) -> Result<LedgerBlock> {
        if !payload.is_object() {
            return Err(FgError::LedgerPayload {
                details: "payload must be a JSON object".to_string(),
            });
        }
        let mut chain = self.chain.lock();
        let Some(last) = chain.last() else {
            return Err(FgError::corrupt(
                self.store.path(),
                0,
                "chain has no genesis block",
            ));
        };
        if self.tail_stale.load(Ordering::Relaxed) {
            self.store.write_tail(&TailPointer::of(last, chain.len()))?;
            self.tail_stale.store(false, Ordering::Relaxed);
        }
        let block = LedgerBlock::seal(
            last.index + 1,
            now_timestamp(),
            payload,
            last.hash.clone(),
        )?;
        self.store.append(&block)?;
        chain.push(block.clone());
        let tail_error = self
            .store
            .write_tail(&TailPointer::of(&block, chain.len()))
            .err();
        self.tail_stale.store(tail_error.is_some(), Ordering::Relaxed);
        drop(chain);

        if let Some(err) = tail_error {
            self.sink.record(
                ActivityEvent::warn("ledger.tail_deferred")
                    .with("index", block.index)
                    .with("error", err.to_string()),
            );
        }
        self.sink.record(
            ActivityEvent::info("ledger.appended")
                .with("index", block.index)
                .with("hash", &block.hash)
                .with("type", block.payload_type()),
        );
        Ok(block)
    }

    /// True when every block hash-links to its predecessor.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.verify_report().valid
    }

    #[must_use]
    pub fn verify_report(&self) -> ChainReport {
        let report = chain::verify(&self.chain.lock());
        let event = if report.valid {
            ActivityEvent::info("ledger.verify")
        } else {
            ActivityEvent::warn("ledger.verify")
        };
        self.sink.record(
            event
                .with("valid", report.valid)
                .with("blocks_checked", report.blocks_checked)
                .with("first_invalid", report.first_invalid)
                .with("reason", &report.reason),
        );
        report
    }

    /// The most recent `limit` blocks of the given payload type, newest first.
    #[must_use]
    pub fn recent_records(&self, limit: usize, type_filter: Option<&str>) -> Vec<LedgerBlock> {
        chain::recent(&self.chain.lock(), limit, type_filter)
            .into_iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> ChainSummary {
        let chain = self.chain.lock();
        ChainSummary {
            total_blocks: chain.len(),
            head_hash: chain.last().map(|b| b.hash.clone()).unwrap_or_default(),
            is_valid: chain::verify(&chain).valid,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.lock().is_empty()
    }

    /// Copy of the full chain.
    #[must_use]
    pub fn blocks(&self) -> Vec<LedgerBlock> {
        self.chain.lock().clone()
    }

    /// Write the chain as a pretty-printed JSON array of blocks.
    pub fn export_array(&self, out: &Path) -> Result<usize> {
        let chain = self.chain.lock();
        let encoded = serde_json::to_vec_pretty(&*chain)?;
        fs::write(out, encoded).map_err(|err| FgError::io(out, err))?;
        Ok(chain.len())
    }

    /// Build a ledger at `path` from an array-format file. The target log must
    /// be empty and the imported chain must verify.
    pub fn import(path: &Path, source: &Path, sink: Arc<dyn ActivitySink>) -> Result<Self> {
        let store = LogStore::new(path);
        let (existing, _) = store.load()?;
        if !existing.is_empty() {
            return Err(FgError::LedgerPayload {
                details: format!(
                    "refusing to import into non-empty ledger at {} ({} blocks)",
                    path.display(),
                    existing.len()
                ),
            });
        }
        let raw = fs::read(source).map_err(|err| FgError::io(source, err))?;
        let blocks: Vec<LedgerBlock> = serde_json::from_slice(&raw)
            .map_err(|err| FgError::corrupt(source, 0, format!("not a block array: {err}")))?;
        let report = chain::verify(&blocks);
        if !report.valid {
            return Err(FgError::corrupt(
                source,
                report.first_invalid.map_or(0, |i| i as usize + 1),
                report.reason.unwrap_or_default(),
            ));
        }
        store.rewrite(&blocks)?;
        sink.record(
            ActivityEvent::info("ledger.imported")
                .with("source", source)
                .with("blocks", blocks.len()),
        );
        Self::open(path, sink)
    }

    /// Truncate the log at `path` to its longest valid prefix. Operator
    /// action; never run implicitly.
    pub fn repair(path: &Path, sink: &dyn ActivitySink) -> Result<RepairReport> {
        let store = LogStore::new(path);
        let scan = store.scan_prefix()?;
        let report = RepairReport {
            kept_blocks: scan.blocks.len(),
            dropped_lines: scan.total_lines.saturating_sub(scan.blocks.len()),
            truncated_bytes: scan.total_bytes - scan.keep_bytes,
            problem: scan.problem.clone(),
        };
        if scan.total_bytes > 0 {
            store.truncate_to(scan.keep_bytes, &scan.blocks)?;
        }
        sink.record(
            ActivityEvent::warn("ledger.repaired")
                .with("path", path)
                .with("kept_blocks", report.kept_blocks)
                .with("dropped_lines", report.dropped_lines)
                .with("truncated_bytes", report.truncated_bytes),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::thread;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::logger::{MemorySink, NullSink};

    fn open(dir: &TempDir) -> Ledger {
        Ledger::open(&dir.path().join("ledger.jsonl"), Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn open_creates_genesis_once() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        assert_eq!(ledger.len(), 1);
        let genesis = ledger.blocks()[0].clone();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        drop(ledger);

        let reopened = open(&dir);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.blocks()[0], genesis);
    }

    #[test]
    fn append_links_and_persists() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let genesis_hash = ledger.blocks()[0].hash.clone();
        let first = ledger.append(json!({"type": "check", "n": 1})).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.previous_hash, genesis_hash);
        ledger.append(json!({"type": "check", "n": 2})).unwrap();
        assert!(ledger.verify());
        drop(ledger);

        let reopened = open(&dir);
        assert_eq!(reopened.len(), 3);
        assert!(reopened.verify());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let err = ledger.append(json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), "FG-4003");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn recent_records_newest_first() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        for n in 1..=5 {
            ledger.append(json!({"type": "check", "n": n})).unwrap();
        }
        let recent = ledger.recent_records(2, Some("check"));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].data["n"], 5);
        assert_eq!(recent[1].data["n"], 4);
    }

    #[test]
    fn concurrent_appends_keep_the_chain_linear() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(open(&dir));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for n in 0..10 {
                        ledger
                            .append(json!({"type": "check", "worker": worker, "n": n}))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(ledger.len(), 41);
        assert!(ledger.verify());
        let indices: Vec<u64> = ledger.blocks().iter().map(|b| b.index).collect();
        assert_eq!(indices, (0..41).collect::<Vec<_>>());
    }

    #[test]
    fn summary_reports_head_and_validity() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        let block = ledger.append(json!({"type": "check"})).unwrap();
        let summary = ledger.summary();
        assert_eq!(summary.total_blocks, 2);
        assert_eq!(summary.head_hash, block.hash);
        assert!(summary.is_valid);
    }

    #[test]
    fn corrupt_log_fails_instead_of_resetting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = open(&dir);
        ledger.append(json!({"type": "check"})).unwrap();
        drop(ledger);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{broken\n").unwrap();

        let err = Ledger::open(&path, Arc::new(NullSink)).unwrap_err();
        assert_eq!(err.code(), "FG-4001");
        assert!(fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        ledger.append(json!({"type": "check", "n": 1})).unwrap();
        let exported = dir.path().join("chain.json");
        assert_eq!(ledger.export_array(&exported).unwrap(), 2);

        let raw: Value = serde_json::from_slice(&fs::read(&exported).unwrap()).unwrap();
        let first = &raw.as_array().unwrap()[1];
        for key in ["index", "timestamp", "data", "previous_hash", "hash"] {
            assert!(first.get(key).is_some(), "missing {key}");
        }

        let target = dir.path().join("imported.jsonl");
        let imported = Ledger::import(&target, &exported, Arc::new(NullSink)).unwrap();
        assert_eq!(imported.blocks(), ledger.blocks());
        assert!(Ledger::import(&target, &exported, Arc::new(NullSink)).is_err());
    }

    #[test]
    fn import_rejects_tampered_array() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir);
        ledger.append(json!({"type": "check", "n": 1})).unwrap();
        let mut blocks = ledger.blocks();
        blocks[1].data["n"] = json!(2);
        let source = dir.path().join("tampered.json");
        fs::write(&source, serde_json::to_vec(&blocks).unwrap()).unwrap();
        let err = Ledger::import(&dir.path().join("x.jsonl"), &source, Arc::new(NullSink))
            .unwrap_err();
        assert_eq!(err.code(), "FG-4001");
    }

    #[test]
    fn repair_truncates_and_logs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = open(&dir);
        ledger.append(json!({"type": "check"})).unwrap();
        drop(ledger);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"index\":2,\"trunc").unwrap();

        let sink = MemorySink::new();
        let report = Ledger::repair(&path, &sink).unwrap();
        assert_eq!(report.kept_blocks, 2);
        assert_eq!(report.dropped_lines, 1);
        assert!(report.truncated_bytes > 0);
        assert_eq!(sink.names(), vec!["ledger.repaired"]);

        let reopened = Ledger::open(&path, Arc::new(NullSink)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.verify());
    }

    #[test]
    fn events_are_emitted() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let ledger = Ledger::open(&dir.path().join("l.jsonl"), sink.clone()).unwrap();
        ledger.append(json!({"type": "check"})).unwrap();
        let _ = ledger.verify();
        assert_eq!(
            sink.names(),
            vec!["ledger.loaded", "ledger.appended", "ledger.verify"]
        );
    }

    #[test]
    fn failed_tail_update_does_not_fail_a_durable_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let sink = Arc::new(MemorySink::new());
        let ledger = Ledger::open(&path, sink.clone()).unwrap();
        ledger.append(json!({"type": "check", "n": 1})).unwrap();

        let tail = LogStore::new(&path).tail_path().to_path_buf();
        fs::remove_file(&tail).unwrap();
        fs::create_dir(&tail).unwrap();

        // The line is on disk, so the caller must not see an error and retry.
        let second = ledger.append(json!({"type": "check", "n": 2})).unwrap();
        assert_eq!(second.index, 2);
        assert_eq!(ledger.len(), 3);
        assert!(sink.names().iter().any(|n| n == "ledger.tail_deferred"));

        // With the pointer still unwritable the next append refuses up front,
        // so the log never drifts more than one block ahead.
        assert!(ledger.append(json!({"type": "check", "n": 3})).is_err());
        assert_eq!(ledger.len(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);

        fs::remove_dir(&tail).unwrap();
        let third = ledger.append(json!({"type": "check", "n": 3})).unwrap();
        assert_eq!(third.previous_hash, second.hash);
        drop(ledger);

        let reopened = Ledger::open(&path, Arc::new(NullSink)).unwrap();
        assert_eq!(reopened.len(), 4);
        assert!(reopened.verify());
        assert_eq!(LogStore::new(&path).load().unwrap().1, TailState::InSync);
    }

    #[test]
    fn stale_pointer_after_a_deferred_update_still_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = Ledger::open(&path, Arc::new(NullSink)).unwrap();
        let tail = LogStore::new(&path).tail_path().to_path_buf();
        let genesis_tail = fs::read(&tail).unwrap();
        fs::remove_file(&tail).unwrap();
        fs::create_dir(&tail).unwrap();
        ledger.append(json!({"type": "check"})).unwrap();
        drop(ledger);

        // Simulate the process exiting before any retry.
        fs::remove_dir(&tail).unwrap();
        fs::write(&tail, genesis_tail).unwrap();
        let reopened = Ledger::open(&path, Arc::new(NullSink)).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(LogStore::new(&path).load().unwrap().1, TailState::InSync);
    }
}
