// Audit Log - durable record of security-relevant events
//
// Append-only in-memory store with an optional JSONL file sink. Each record
// call is atomic with respect to concurrent writers; queries see a
// consistent snapshot. Only the retention cap prunes events.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::error::EngineError;
use crate::domain::events::{EventSink, SecurityEvent, SecurityEventType};

/// Aggregate statistics over the recorded trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_events: u64,
    pub violations_count: u64,
    pub by_type: HashMap<String, u64>,
}

/// Queryable, append-only audit store.
pub struct AuditLog {
    events: RwLock<VecDeque<SecurityEvent>>,
    max_events: usize,
    sink: Option<Mutex<File>>,
}

impl AuditLog {
    /// In-memory only.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events,
            sink: None,
        }
    }

    /// In-memory plus a JSONL file sink (one event per line, append-only).
    pub fn with_file(max_events: usize, path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Configuration(format!(
                        "cannot create audit log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                EngineError::Configuration(format!(
                    "cannot open audit log {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            events: RwLock::new(VecDeque::new()),
            max_events,
            sink: Some(Mutex::new(file)),
        })
    }

    /// Append one event. Atomic with respect to concurrent `record` calls;
    /// the file sink never drops the in-memory copy on failure.
    pub fn record(&self, event: SecurityEvent) {
        {
            let mut events = self.events.write();
            events.push_back(event.clone());
            while events.len() > self.max_events {
                events.pop_front();
            }
        }

        if let Some(ref sink) = self.sink {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    let mut file = sink.lock();
                    if let Err(e) = writeln!(file, "{}", line) {
                        error!(error = %e, "audit log write failed");
                    }
                }
                Err(e) => {
                    error!(error = %e, "audit event serialization failed");
                }
            }
        }
    }

    /// Query recorded events, most recent first.
    pub fn query(
        &self,
        event_type: Option<SecurityEventType>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<SecurityEvent> {
        let events = self.events.read();
        events
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| user_id.map_or(true, |u| e.user_id.as_deref() == Some(u)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Aggregate statistics over the retained trail.
    pub fn stats(&self) -> AuditStats {
        let events = self.events.read();
        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut violations_count = 0u64;
        for event in events.iter() {
            *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            if event.event_type == SecurityEventType::SecurityViolation {
                violations_count += 1;
            }
        }
        AuditStats {
            total_events: events.len() as u64,
            violations_count,
            by_type,
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSink for AuditLog {
    fn record(&self, event: SecurityEvent) {
        if event.event_type == SecurityEventType::SecurityViolation {
            warn!(operation_id = %event.operation_id, "security violation recorded");
        }
        AuditLog::record(self, event);
    }
}
