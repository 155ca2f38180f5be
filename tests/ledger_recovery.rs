//! Ledger crash and corruption scenarios against real files.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use freshness_gate::ledger::{Ledger, LedgerBlock, LogStore};
use freshness_gate::logger::NullSink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tempfile::TempDir;

fn seeded(path: &Path, records: u64) -> Ledger {
    let ledger = Ledger::open(path, Arc::new(NullSink)).unwrap();
    for n in 1..=records {
        ledger.append(json!({"type": "freshness_check", "n": n})).unwrap();
    }
    ledger
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn reopening_after_clean_shutdown_preserves_everything() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let before = seeded(&path, 5).blocks();
    let after = Ledger::open(&path, Arc::new(NullSink)).unwrap();
    assert_eq!(after.blocks(), before);
    assert!(after.verify());
}

#[test]
fn crash_between_log_write_and_tail_update_recovers_on_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    let ledger = seeded(&path, 2);
    let head = ledger.blocks().last().cloned().unwrap();
    drop(ledger);

    // Simulate an append whose tail pointer never landed.
    let orphan = LedgerBlock::seal(
        head.index + 1,
        "2024-06-01T12:00:00.000000".to_string(),
        json!({"type": "freshness_check", "n": 3}),
        head.hash.clone(),
    )
    .unwrap();
    LogStore::new(&path).append(&orphan).unwrap();

    let reopened = Ledger::open(&path, Arc::new(NullSink)).unwrap();
    assert_eq!(reopened.len(), 4);
    assert!(reopened.verify());
    let tail = LogStore::new(&path).read_tail().unwrap().unwrap();
    assert_eq!(tail.blocks, 4);
    assert_eq!(tail.hash, orphan.hash);
}

#[test]
fn torn_write_fails_loudly_then_repairs() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    drop(seeded(&path, 3));
    let intact_len = fs::metadata(&path).unwrap().len();
    append_raw(&path, br#"{"index":4,"timestamp":"2024"#);

    let err = Ledger::open(&path, Arc::new(NullSink)).unwrap_err();
    assert_eq!(err.code(), "FG-4001");
    // The failed open must not have rewritten anything.
    assert!(fs::metadata(&path).unwrap().len() > intact_len);

    let report = Ledger::repair(&path, &NullSink).unwrap();
    assert_eq!(report.kept_blocks, 4);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

    let ledger = Ledger::open(&path, Arc::new(NullSink)).unwrap();
    assert!(ledger.verify());
    let next = ledger.append(json!({"type": "freshness_check", "n": 4})).unwrap();
    assert_eq!(next.index, 4);
}

#[test]
fn edited_record_is_caught_by_verify_not_by_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    drop(seeded(&path, 3));

    let raw = fs::read_to_string(&path).unwrap();
    let tampered = raw.replacen("\"n\":2", "\"n\":20", 1);
    assert_ne!(raw, tampered);
    fs::write(&path, tampered).unwrap();

    let ledger = Ledger::open(&path, Arc::new(NullSink)).unwrap();
    let report = ledger.verify_report();
    assert!(!report.valid);
    assert_eq!(report.first_invalid, Some(2));
    assert!(!ledger.summary().is_valid);
}

#[test]
fn deleted_tail_pointer_is_a_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");
    drop(seeded(&path, 2));
    fs::remove_file(LogStore::new(&path).tail_path()).unwrap();

    let err = Ledger::open(&path, Arc::new(NullSink)).unwrap_err();
    assert_eq!(err.code(), "FG-4002");

    Ledger::repair(&path, &NullSink).unwrap();
    assert_eq!(Ledger::open(&path, Arc::new(NullSink)).unwrap().len(), 3);
}

#[test]
fn legacy_array_is_imported_into_an_empty_log() {
    let dir = TempDir::new().unwrap();
    let original = seeded(&dir.path().join("old.jsonl"), 4);
    let legacy = dir.path().join("blockchain.json");
    original.export_array(&legacy).unwrap();

    // Rename fields to the camelCase form older exports used.
    let camel = fs::read_to_string(&legacy)
        .unwrap()
        .replace("\"previous_hash\"", "\"previousHash\"")
        .replace("\"data\"", "\"payload\"");
    fs::write(&legacy, camel).unwrap();

    let target = dir.path().join("new.jsonl");
    let ledger = Ledger::open_or_import(&target, Some(&legacy), Arc::new(NullSink)).unwrap();
    assert_eq!(ledger.blocks(), original.blocks());

    // Once populated the legacy file is ignored.
    let again = Ledger::open_or_import(&target, Some(&legacy), Arc::new(NullSink)).unwrap();
    assert_eq!(again.len(), 5);
}

#[test]
fn repair_keeps_exactly_the_complete_lines_at_any_cut() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..24 {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.jsonl");
        drop(seeded(&path, 4));
        let raw = fs::read(&path).unwrap();
        let genesis_end = raw.iter().position(|&b| b == b'\n').unwrap() + 1;
        let cut = rng.random_range(genesis_end..=raw.len());
        let expected = raw[..cut].iter().filter(|&&b| b == b'\n').count();

        fs::write(&path, &raw[..cut]).unwrap();
        let report = Ledger::repair(&path, &NullSink).unwrap();
        assert_eq!(report.kept_blocks, expected, "round {round}, cut {cut}");

        let ledger = Ledger::open(&path, Arc::new(NullSink)).unwrap();
        assert_eq!(ledger.len(), expected);
        assert!(ledger.verify());
    }
}

#[test]
fn chain_written_by_the_legacy_service_imports_and_keeps_growing() {
    let fixture =
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/legacy_blockchain.json");
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("ledger.jsonl");

    let ledger = Ledger::open_or_import(&target, Some(&fixture), Arc::new(NullSink)).unwrap();
    assert_eq!(ledger.len(), 4);
    assert!(ledger.verify());
    let blocks = ledger.blocks();
    assert_eq!(blocks[1].data["filename"], "p\u{ea}che_\u{e9}t\u{e9}.jpg");
    assert_eq!(blocks[2].data["emoji"], "\u{1f34c}");
    let head = "ad5eb3051af568a7c5367f5960ff5908f709e206ec323d90092d86a053fbf689";
    assert_eq!(blocks[3].hash, head);

    let next = ledger.append(json!({"type": "freshness_check", "confidence": 87.5})).unwrap();
    assert_eq!(next.previous_hash, head);
    drop(ledger);

    // The JSONL copy re-serialises numbers differently; hashes must not care.
    let reopened = Ledger::open(&target, Arc::new(NullSink)).unwrap();
    assert_eq!(reopened.len(), 5);
    assert!(reopened.verify());
}
