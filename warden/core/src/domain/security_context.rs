// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-operation security context.
//!
//! A [`SecurityContext`] is created per logical operation and passed
//! explicitly to every validator and executor call; no component reaches for
//! ambient global security state. One user request may span multiple tool
//! invocations that share one context. Events logged through a context are
//! appended to its in-memory log and forwarded to the audit log in the same
//! order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::events::{EventSink, SecurityEvent, SecurityEventType};

/// Unique identifier of one top-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Carrier of identity and the accumulated operation log.
///
/// Logically owned by the caller for the duration of one operation and
/// discarded after the final event is flushed.
pub struct SecurityContext {
    operation_id: OperationId,
    user_id: Option<String>,
    started_at: DateTime<Utc>,
    start: Instant,
    log: Mutex<Vec<SecurityEvent>>,
    sink: Arc<dyn EventSink>,
}

impl SecurityContext {
    pub fn new(user_id: Option<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            operation_id: OperationId::new(),
            user_id,
            started_at: Utc::now(),
            start: Instant::now(),
            log: Mutex::new(Vec::new()),
            sink,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time since the context was created. Callers use this to
    /// apply their own higher-level deadlines.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Append an event to the in-memory log and forward it to the audit log.
    ///
    /// The lock is held across the forward so the audit log observes events
    /// from this context in `log_operation` order.
    pub fn log_operation(&self, event_type: SecurityEventType, details: Value) {
        let event = SecurityEvent::new(
            event_type,
            self.operation_id,
            self.user_id.clone(),
            details,
        );
        let mut log = self.log.lock();
        log.push(event.clone());
        self.sink.record(event);
    }

    /// Snapshot of the accumulated log, in append order.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.log.lock().clone()
    }
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext")
            .field("operation_id", &self.operation_id)
            .field("user_id", &self.user_id)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<SecurityEvent>>,
    }

    impl EventSink for RecordingSink {
        fn record(&self, event: SecurityEvent) {
            self.events.lock().push(event);
        }
    }

    #[test]
    fn test_log_operation_appends_and_forwards() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = SecurityContext::new(Some("alice".to_string()), sink.clone());

        ctx.log_operation(SecurityEventType::ToolStart, json!({"tool": "echo"}));
        ctx.log_operation(SecurityEventType::ToolSuccess, json!({"tool": "echo"}));

        let local = ctx.events();
        assert_eq!(local.len(), 2);
        assert_eq!(local[0].event_type, SecurityEventType::ToolStart);
        assert_eq!(local[1].event_type, SecurityEventType::ToolSuccess);

        let forwarded = sink.events.lock();
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0].event_type, SecurityEventType::ToolStart);
        assert!(forwarded.iter().all(|e| e.operation_id == ctx.operation_id()));
        assert!(forwarded.iter().all(|e| e.user_id.as_deref() == Some("alice")));
    }

    #[test]
    fn test_contexts_have_distinct_operation_ids() {
        let sink = Arc::new(RecordingSink::default());
        let a = SecurityContext::new(None, sink.clone());
        let b = SecurityContext::new(None, sink);
        assert_ne!(a.operation_id(), b.operation_id());
    }

    #[test]
    fn test_elapsed_increases() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = SecurityContext::new(None, sink);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.elapsed() >= Duration::from_millis(5));
    }
}
