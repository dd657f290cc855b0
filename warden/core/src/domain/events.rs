// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Security audit events.
//!
//! A [`SecurityEvent`] is the append-only unit of the audit trail. Once
//! written it is never mutated or deleted by normal operation; only the
//! audit log's explicit retention policy may prune.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::security_context::OperationId;

/// Classification of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    ToolStart,
    ToolSuccess,
    ToolError,
    SecurityViolation,
    ResourceLimitExceeded,
    FileAccess,
    NetworkRequest,
    TempFileCreated,
    TempFileReleased,
    ConfigReloaded,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::ToolStart => "tool_start",
            SecurityEventType::ToolSuccess => "tool_success",
            SecurityEventType::ToolError => "tool_error",
            SecurityEventType::SecurityViolation => "security_violation",
            SecurityEventType::ResourceLimitExceeded => "resource_limit_exceeded",
            SecurityEventType::FileAccess => "file_access",
            SecurityEventType::NetworkRequest => "network_request",
            SecurityEventType::TempFileCreated => "temp_file_created",
            SecurityEventType::TempFileReleased => "temp_file_released",
            SecurityEventType::ConfigReloaded => "config_reloaded",
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One security-relevant occurrence, traceable to exactly one
/// [`SecurityContext`](crate::domain::security_context::SecurityContext).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub operation_id: OperationId,
    pub user_id: Option<String>,
    /// Free-form structured payload (always a JSON object).
    pub details: Value,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        operation_id: OperationId,
        user_id: Option<String>,
        details: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            operation_id,
            user_id,
            details,
        }
    }
}

/// Destination for recorded events.
///
/// Implemented by the audit log; the
/// [`SecurityContext`](crate::domain::security_context::SecurityContext)
/// forwards every `log_operation` call through this seam so domain code
/// never depends on audit storage.
pub trait EventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_snake_case_serialization() {
        let json = serde_json::to_string(&SecurityEventType::ResourceLimitExceeded).unwrap();
        assert_eq!(json, "\"resource_limit_exceeded\"");

        let parsed: SecurityEventType = serde_json::from_str("\"tool_start\"").unwrap();
        assert_eq!(parsed, SecurityEventType::ToolStart);
    }

    #[test]
    fn test_event_round_trip() {
        let event = SecurityEvent::new(
            SecurityEventType::NetworkRequest,
            OperationId::new(),
            Some("alice".to_string()),
            json!({"url": "https://example.com", "method": "GET"}),
        );
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: SecurityEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.event_type, SecurityEventType::NetworkRequest);
        assert_eq!(decoded.operation_id, event.operation_id);
        assert_eq!(decoded.user_id.as_deref(), Some("alice"));
    }
}
