//! Append-only emission of provenance records and the session registry.
//!
//! Each record becomes one line: `_PROV_<timestamp>_PROV_<json>`. Lines go to
//! every configured [`RecordSink`]; by default that is the `provenance`
//! tracing target. Nothing is deduplicated, buffered, or rolled back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use lineage_types::{Instrumented, PROV_PREFIX, ProvenanceRecord, SessionId, SessionRecord};
use sha2::{Digest, Sha256};

use crate::graph::{LogEntry, parse_line};
use crate::system::{self, SnapshotConfig};

/// Tracing target provenance lines are logged under.
pub const PROVENANCE_TARGET: &str = "provenance";

pub trait RecordSink: Send + Sync {
    fn write(&self, line: &str);
}

/// Writes lines through `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn write(&self, line: &str) {
        tracing::info!(target: PROVENANCE_TARGET, "{line}");
    }
}

/// Keeps lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Parsed records, in emission order. Unparseable lines are dropped.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lines()
            .iter()
            .filter_map(|line| parse_line(line).and_then(Result::ok))
            .collect()
    }

    #[must_use]
    pub fn records(&self) -> Vec<ProvenanceRecord> {
        self.entries().into_iter().map(|entry| entry.record).collect()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RecordSink for MemorySink {
    fn write(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Identifies one instrumented instance for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub type_name: &'static str,
    pub instance: u64,
}

impl SessionKey {
    #[must_use]
    pub fn of<T: Instrumented + ?Sized>(instance: &T) -> Self {
        Self {
            type_name: instance.type_name(),
            instance: instance.instance_id().value(),
        }
    }

    fn session_id(&self) -> SessionId {
        let mut hasher = Sha256::new();
        hasher.update(self.type_name.as_bytes());
        hasher.update(self.instance.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        SessionId::new(u64::from_le_bytes(bytes) >> 1)
    }
}

pub struct Recorder {
    sinks: Vec<Box<dyn RecordSink>>,
    snapshot: SnapshotConfig,
    sessions: Mutex<HashMap<SessionKey, SessionId>>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl Recorder {
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn RecordSink>>, snapshot: SnapshotConfig) -> Self {
        let sinks = if sinks.is_empty() {
            vec![Box::new(TracingSink) as Box<dyn RecordSink>]
        } else {
            sinks
        };
        Self {
            sinks,
            snapshot,
            sessions: Mutex::new(HashMap::new()),
            last_stamp: Mutex::new(None),
        }
    }

    /// Wall-clock time that never goes backwards within this recorder.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let stamp = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    pub fn append(&self, record: &ProvenanceRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(kind = record.kind(), error = %err, "Failed to serialize provenance record");
                return;
            }
        };
        let stamp = format_time(self.timestamp());
        let line = format!("{PROV_PREFIX}{stamp}{PROV_PREFIX}{json}");
        for sink in &self.sinks {
            sink.write(&line);
        }
    }

    /// Session id for `key`. The first call for a key gathers the system
    /// snapshot and appends the session record.
    pub fn session(
        &self,
        key: SessionKey,
        start_time: &str,
        config: Option<String>,
    ) -> SessionId {
        let session_id = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(&existing) = sessions.get(&key) {
                return existing;
            }
            let session_id = key.session_id();
            sessions.insert(key, session_id);
            session_id
        };

        tracing::debug!(session = %session_id, name = key.type_name, "New provenance session");
        let record = SessionRecord {
            session_id,
            session_name: key.type_name.to_string(),
            start_time: start_time.to_string(),
            config,
            system: system::gather(&self.snapshot),
        };
        self.append(&ProvenanceRecord::Session(Box::new(record)));
        session_id
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}
