// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandboxed execution unit seam.
//!
//! A sandboxed unit is an isolated runtime boundary with no implicit access
//! to host filesystem, network or long-lived state. The engine talks to it
//! through the [`SandboxRuntime`] trait so the isolation mechanism stays
//! swappable behind the domain boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Child;

use crate::domain::error::EngineError;

/// Isolation mechanism backing a sandboxed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// A fresh OS process per invocation.
    Process,
    Docker,
    Firecracker,
}

impl IsolationMode {
    /// Validate the isolation mode and reject unsupported ones.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            IsolationMode::Process => Ok(()),
            IsolationMode::Docker => Err(EngineError::Configuration(
                "Docker isolation is not yet implemented. Use 'process'.".to_string(),
            )),
            IsolationMode::Firecracker => Err(EngineError::Configuration(
                "Firecracker isolation is not yet implemented. Use 'process'.".to_string(),
            )),
        }
    }
}

/// One request to run untrusted code in a fresh unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    /// Per-invocation scratch directory; the unit's only writable
    /// filesystem surface and its working directory.
    pub scratch_dir: PathBuf,
}

/// A spawned, not-yet-finished execution unit.
pub struct SpawnedUnit {
    pub pid: u32,
    pub child: Child,
}

/// Spawns isolated execution units. Implementations must guarantee a fresh
/// unit per call — never a shared interpreter state.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn spawn(&self, request: &ExecutionRequest) -> Result<SpawnedUnit, EngineError>;
}

/// Map a language name to its interpreter and source file name.
pub fn interpreter_for(language: &str) -> Result<(&'static str, &'static str), EngineError> {
    match language {
        "python" => Ok(("python3", "main.py")),
        "javascript" | "typescript" => Ok(("node", "main.js")),
        "shell" | "sh" => Ok(("sh", "main.sh")),
        other => Err(EngineError::Validation(format!(
            "unsupported execution language '{}'. Supported: python, javascript, shell",
            other
        ))),
    }
}

/// Resources consumed by one execution, as observed by the monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub peak_memory_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub cpu_time: Duration,
}

/// Outcome of one sandboxed execution.
///
/// Produced once per invocation. A failure inside the unit is a non-zero
/// (or absent, when killed by signal) `exit_code`, not an engine error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the unit was killed by a signal.
    pub exit_code: Option<i32>,
    pub resource_usage: ResourceUsage,
    /// True when the monitor forcibly terminated the unit.
    pub terminated_by_limit: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.terminated_by_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_process_isolation_is_supported() {
        assert!(IsolationMode::Process.validate().is_ok());
        assert!(IsolationMode::Docker.validate().is_err());
        assert!(IsolationMode::Firecracker.validate().is_err());
    }

    #[test]
    fn test_interpreter_mapping() {
        assert_eq!(interpreter_for("python").unwrap().0, "python3");
        assert_eq!(interpreter_for("javascript").unwrap().0, "node");
        assert_eq!(interpreter_for("shell").unwrap().0, "sh");
        assert!(matches!(
            interpreter_for("cobol"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_result_success_requires_clean_exit() {
        let usage = ResourceUsage::default();
        let ok = ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            resource_usage: usage.clone(),
            terminated_by_limit: false,
        };
        assert!(ok.success());

        let killed = ExecutionResult {
            exit_code: None,
            terminated_by_limit: true,
            ..ok.clone()
        };
        assert!(!killed.success());

        let failed = ExecutionResult {
            exit_code: Some(1),
            ..ok
        };
        assert!(!failed.success());
    }
}
