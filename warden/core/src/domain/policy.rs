// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Security levels and resource limits.
//!
//! The policy model is pure data plus one pure function:
//! [`effective_limits`] merges the built-in defaults for a
//! [`SecurityLevel`] with an optional per-tool override, taking the
//! stricter value on every field. An override can only narrow a
//! built-in ceiling, never widen it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::error::EngineError;

/// Ordered security classification for tools and operations.
///
/// Higher levels strictly narrow the permitted operation set:
/// anything permitted at `Restricted` is permitted at every lower level,
/// never the reverse.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Restricted,
}

impl SecurityLevel {
    /// Built-in resource ceilings for this level.
    ///
    /// Each field narrows monotonically as the level rises.
    pub fn default_limits(self) -> ResourceLimits {
        match self {
            SecurityLevel::Low => ResourceLimits {
                max_execution_time: Duration::from_secs(60),
                max_memory_bytes: 1024 * 1024 * 1024,
                max_cpu_percent: 80.0,
                max_file_size_bytes: 50 * 1024 * 1024,
                max_network_requests: 30,
            },
            SecurityLevel::Medium => ResourceLimits {
                max_execution_time: Duration::from_secs(30),
                max_memory_bytes: 512 * 1024 * 1024,
                max_cpu_percent: 50.0,
                max_file_size_bytes: 10 * 1024 * 1024,
                max_network_requests: 10,
            },
            SecurityLevel::High => ResourceLimits {
                max_execution_time: Duration::from_secs(10),
                max_memory_bytes: 256 * 1024 * 1024,
                max_cpu_percent: 25.0,
                max_file_size_bytes: 5 * 1024 * 1024,
                max_network_requests: 5,
            },
            SecurityLevel::Restricted => ResourceLimits {
                max_execution_time: Duration::from_secs(5),
                max_memory_bytes: 128 * 1024 * 1024,
                max_cpu_percent: 10.0,
                max_file_size_bytes: 1024 * 1024,
                max_network_requests: 0,
            },
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SecurityLevel::Low => "low",
            SecurityLevel::Medium => "medium",
            SecurityLevel::High => "high",
            SecurityLevel::Restricted => "restricted",
        };
        f.write_str(s)
    }
}

/// Hard resource ceilings applied to one invocation.
///
/// Immutable once an invocation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(with = "humantime_serde")]
    pub max_execution_time: Duration,
    pub max_memory_bytes: u64,
    pub max_cpu_percent: f64,
    pub max_file_size_bytes: u64,
    pub max_network_requests: u32,
}

/// Reject override fields that cannot express a meaningful ceiling.
///
/// A zero time/memory/file ceiling would make every execution fail before it
/// starts; a CPU percentage outside `(0, 100]` is not a ceiling at all.
/// `max_network_requests == 0` is valid (deny all outbound requests).
pub fn validate_override(limits: &ResourceLimits) -> Result<(), EngineError> {
    if limits.max_execution_time.is_zero() {
        return Err(EngineError::Configuration(
            "max_execution_time override must be non-zero".to_string(),
        ));
    }
    if limits.max_memory_bytes == 0 {
        return Err(EngineError::Configuration(
            "max_memory_bytes override must be non-zero".to_string(),
        ));
    }
    if limits.max_cpu_percent <= 0.0 || limits.max_cpu_percent > 100.0 {
        return Err(EngineError::Configuration(format!(
            "max_cpu_percent override must be within (0, 100], got {}",
            limits.max_cpu_percent
        )));
    }
    if limits.max_file_size_bytes == 0 {
        return Err(EngineError::Configuration(
            "max_file_size_bytes override must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// Merge the built-in defaults for `level` with an optional per-tool
/// override, taking the stricter of the two on every field.
///
/// # Errors
///
/// `EngineError::Configuration` when the override contains malformed values
/// (see [`validate_override`]).
pub fn effective_limits(
    level: SecurityLevel,
    override_limits: Option<&ResourceLimits>,
) -> Result<ResourceLimits, EngineError> {
    let defaults = level.default_limits();

    let Some(overrides) = override_limits else {
        return Ok(defaults);
    };
    validate_override(overrides)?;

    Ok(ResourceLimits {
        max_execution_time: defaults.max_execution_time.min(overrides.max_execution_time),
        max_memory_bytes: defaults.max_memory_bytes.min(overrides.max_memory_bytes),
        max_cpu_percent: defaults.max_cpu_percent.min(overrides.max_cpu_percent),
        max_file_size_bytes: defaults
            .max_file_size_bytes
            .min(overrides.max_file_size_bytes),
        max_network_requests: defaults
            .max_network_requests
            .min(overrides.max_network_requests),
    })
}
