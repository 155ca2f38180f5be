//! JSONL activity log.
//!
//! One JSON object per line: `ts`, `level`, `event`, then event-specific
//! fields. If the target file cannot be opened or a write fails, the logger
//! degrades to stderr instead of failing the pipeline run that emitted it.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single structured activity record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEvent {
    pub ts: String,
    pub level: Level,
    pub event: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ActivityEvent {
    #[must_use]
    pub fn new(level: Level, event: impl Into<String>) -> Self {
        Self {
            ts: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            level,
            event: event.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn info(event: impl Into<String>) -> Self {
        Self::new(Level::Info, event)
    }

    #[must_use]
    pub fn warn(event: impl Into<String>) -> Self {
        Self::new(Level::Warn, event)
    }

    /// Attach a field. Values that fail to serialize are recorded as `null`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.fields.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Destination for activity events.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Keeps events in memory; used by embedding callers and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.event.clone())
            .collect()
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }
}

enum Destination {
    File(BufWriter<File>),
    Stderr,
}

/// Append-only JSONL writer.
pub struct JsonlLogger {
    path: Option<PathBuf>,
    destination: Mutex<Destination>,
    degraded: Mutex<Option<String>>,
}

impl JsonlLogger {
    /// Open `path` for appending, degrading to stderr if that fails.
    #[must_use]
    pub fn open(path: &Path) -> Self {
        let opened = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path));
        match opened {
            Ok(file) => Self {
                path: Some(path.to_path_buf()),
                destination: Mutex::new(Destination::File(BufWriter::new(file))),
                degraded: Mutex::new(None),
            },
            Err(err) => Self {
                path: Some(path.to_path_buf()),
                destination: Mutex::new(Destination::Stderr),
                degraded: Mutex::new(Some(format!("open {}: {err}", path.display()))),
            },
        }
    }

    #[must_use]
    pub fn stderr() -> Self {
        Self {
            path: None,
            destination: Mutex::new(Destination::Stderr),
            degraded: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reason the logger fell back to stderr, if it did.
    #[must_use]
    pub fn degraded_reason(&self) -> Option<String> {
        self.degraded.lock().clone()
    }
}

impl ActivitySink for JsonlLogger {
    fn record(&self, event: ActivityEvent) {
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let mut destination = self.destination.lock();
        if let Destination::File(writer) = &mut *destination {
            let written = writeln!(writer, "{line}").and_then(|()| writer.flush());
            match written {
                Ok(()) => return,
                Err(err) => {
                    *self.degraded.lock() = Some(format!("write: {err}"));
                    *destination = Destination::Stderr;
                }
            }
        }
        eprintln!("{line}");
    }
}
