//! A single hash-linked ledger block.

use std::fmt::Write as _;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::core::errors::Result;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Message carried by the genesis payload.
pub const GENESIS_MESSAGE: &str = "Fruit Freshness Blockchain Initialized";

/// One immutable record. `hash` is a pure function of the other four fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBlock {
    /// Position in the chain, genesis is 0.
    pub index: u64,
    /// ISO-8601 creation time, hashed verbatim.
    pub timestamp: String,
    /// Opaque payload.
    #[serde(alias = "payload")]
    pub data: Value,
    /// `hash` of the preceding block.
    #[serde(alias = "previousHash")]
    pub previous_hash: String,
    /// Lowercase hex SHA-256.
    pub hash: String,
}

impl LedgerBlock {
    /// Build a block and compute its hash.
    pub fn seal(index: u64, timestamp: String, data: Value, previous_hash: String) -> Result<Self> {
        let hash = compute_hash(index, &timestamp, &data, &previous_hash)?;
        Ok(Self {
            index,
            timestamp,
            data,
            previous_hash,
            hash,
        })
    }

    /// Block 0 with the fixed genesis payload.
    pub fn genesis(timestamp: String) -> Result<Self> {
        Self::seal(
            0,
            timestamp,
            json!({ "type": "genesis", "message": GENESIS_MESSAGE }),
            GENESIS_PREVIOUS_HASH.to_string(),
        )
    }

    /// Hash recomputed from the stored fields.
    pub fn recompute_hash(&self) -> Result<String> {
        compute_hash(self.index, &self.timestamp, &self.data, &self.previous_hash)
    }

    /// Stored hash equals the recomputed one.
    #[must_use]
    pub fn hash_matches(&self) -> bool {
        self.recompute_hash().is_ok_and(|hash| hash == self.hash)
    }

    /// `data.type`, when present.
    #[must_use]
    pub fn payload_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    /// Index 0 linked to the `"0"` sentinel.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }
}

/// SHA-256 over the canonical JSON of the four hashed fields.
///
/// The canonical text is what Python's `json.dumps(obj, sort_keys=True)`
/// emits, so chains written by older deployments verify unchanged.
/// `serde_json::Map` orders keys by code point, which matches `sort_keys`.
pub fn compute_hash(
    index: u64,
    timestamp: &str,
    data: &Value,
    previous_hash: &str,
) -> Result<String> {
    let canonical = json!({
        "index": index,
        "timestamp": timestamp,
        "data": data,
        "previous_hash": previous_hash,
    });
    Ok(sha256_hex(canonical_json(&canonical)?.as_bytes()))
}

/// `value` as `json.dumps(value, sort_keys=True)` would print it.
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SortKeysFormatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// `", "` / `": "` separators, ASCII-only strings, `repr`-style floats.
struct SortKeysFormatter;

impl Formatter for SortKeysFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W, first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W, first: bool,
    ) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(float_repr(value).as_bytes())
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Shortest round-trip digits, laid out the way Python's `float.__repr__`
/// does: positional for decimal exponents in `-4..16`, otherwise `d.ddde+XX`.
fn float_repr(value: f64) -> String {
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let (sign, mantissa) = mantissa
        .strip_prefix('-')
        .map_or(("", mantissa), |rest| ("-", rest));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    let mut out = String::from(sign);
    if (0..16).contains(&exponent) {
        let whole = exponent as usize + 1;
        if digits.len() <= whole {
            out.push_str(&digits);
            out.extend(std::iter::repeat_n('0', whole - digits.len()));
            out.push_str(".0");
        } else {
            out.push_str(&digits[..whole]);
            out.push('.');
            out.push_str(&digits[whole..]);
        }
    } else if (-4..0).contains(&exponent) {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', exponent.unsigned_abs() as usize - 1));
        out.push_str(&digits);
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "e{sign}{:02}", exponent.unsigned_abs());
    }
    out
}

/// SHA-256 of arbitrary bytes as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex(&Sha256::digest(bytes))
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Current local time, ISO-8601 with microseconds.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
