//! Pure checks and queries over an ordered block sequence.

use serde::Serialize;

use super::block::{GENESIS_PREVIOUS_HASH, LedgerBlock};

/// Result of a full integrity walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Every block passed.
    pub valid: bool,
    /// Blocks inspected before stopping.
    pub blocks_checked: usize,
    /// Index of the first block that failed, if any.
    pub first_invalid: Option<u64>,
    /// Why that block failed.
    pub reason: Option<String>,
}

impl ChainReport {
    fn ok(blocks_checked: usize) -> Self {
        Self {
            valid: true,
            blocks_checked,
            first_invalid: None,
            reason: None,
        }
    }

    fn broken(blocks_checked: usize, at: u64, reason: String) -> Self {
        Self {
            valid: false,
            blocks_checked,
            first_invalid: Some(at),
            reason: Some(reason),
        }
    }
}

/// Why `block` cannot follow `prev`, or `None` when the link holds.
#[must_use]
pub fn link_error(prev: &LedgerBlock, block: &LedgerBlock) -> Option<String> {
    if block.index != prev.index + 1 {
        return Some(format!(
            "index {} does not follow {}",
            block.index, prev.index
        ));
    }
    if block.previous_hash != prev.hash {
        return Some("previous_hash does not match predecessor".to_string());
    }
    if !block.hash_matches() {
        return Some("stored hash does not match contents".to_string());
    }
    None
}

/// Check the genesis block on its own.
#[must_use]
pub fn genesis_error(block: &LedgerBlock) -> Option<String> {
    if block.index != 0 {
        return Some(format!("first block has index {}", block.index));
    }
    if block.previous_hash != GENESIS_PREVIOUS_HASH {
        return Some("genesis previous_hash is not \"0\"".to_string());
    }
    if !block.hash_matches() {
        return Some("genesis hash does not match contents".to_string());
    }
    None
}

/// Walk the whole chain. Read-only.
#[must_use]
pub fn verify(blocks: &[LedgerBlock]) -> ChainReport {
    let Some(first) = blocks.first() else {
        return ChainReport::broken(0, 0, "chain is empty".to_string());
    };
    if let Some(reason) = genesis_error(first) {
        return ChainReport::broken(1, first.index, reason);
    }
    for (checked, pair) in blocks.windows(2).enumerate() {
        if let Some(reason) = link_error(&pair[0], &pair[1]) {
            return ChainReport::broken(checked + 2, pair[1].index, reason);
        }
    }
    ChainReport::ok(blocks.len())
}

/// Length of the longest prefix that verifies.
#[must_use]
pub fn valid_prefix_len(blocks: &[LedgerBlock]) -> usize {
    match blocks.first() {
        None => 0,
        Some(first) if genesis_error(first).is_some() => 0,
        Some(_) => {
            1 + blocks
                .windows(2)
                .take_while(|pair| link_error(&pair[0], &pair[1]).is_none())
                .count()
        }
    }
}

/// The most recent `limit` blocks whose payload type matches, newest first.
/// `None` matches every non-genesis block.
#[must_use]
pub fn recent<'a>(
    blocks: &'a [LedgerBlock],
    limit: usize,
    type_filter: Option<&str>,
) -> Vec<&'a LedgerBlock> {
    blocks
        .iter()
        .rev()
        .filter(|block| match type_filter {
            Some(kind) => block.payload_type() == Some(kind),
            None => !block.is_genesis(),
        })
        .take(limit)
        .collect()
}
