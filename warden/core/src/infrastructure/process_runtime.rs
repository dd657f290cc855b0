// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process-based sandbox runtime.
//!
//! Each invocation gets a freshly spawned OS process: cleared environment,
//! working directory pinned to the per-invocation scratch directory, stdin
//! closed, stdout/stderr piped back to the supervisor. The process is the
//! isolation boundary; nothing from a previous invocation survives into the
//! next.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::EngineError;
use crate::domain::sandbox::{
    interpreter_for, ExecutionRequest, IsolationMode, SandboxRuntime, SpawnedUnit,
};

pub struct ProcessRuntime {
    isolation: IsolationMode,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self {
            isolation: IsolationMode::Process,
        }
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for ProcessRuntime {
    async fn spawn(&self, request: &ExecutionRequest) -> Result<SpawnedUnit, EngineError> {
        self.isolation.validate()?;

        let (program, source_name) = interpreter_for(&request.language)?;
        let source_path = request.scratch_dir.join(source_name);
        tokio::fs::write(&source_path, &request.code)
            .await
            .map_err(|e| {
                EngineError::Internal(format!(
                    "cannot stage source in scratch dir {}: {}",
                    request.scratch_dir.display(),
                    e
                ))
            })?;

        let mut command = Command::new(program);
        command
            .arg(&source_path)
            .current_dir(&request.scratch_dir)
            .env_clear()
            // Interpreters need a minimal PATH to resolve themselves; the
            // unit inherits nothing else from the host environment.
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The unit leads its own process group so forced termination reaps
        // the whole tree, not just the interpreter.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            EngineError::Internal(format!("failed to spawn {}: {}", program, e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| EngineError::Internal("spawned unit has no pid".to_string()))?;
        debug!(pid = pid, program = program, "sandboxed unit spawned");

        Ok(SpawnedUnit { pid, child })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_runs_in_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::new();
        let request = ExecutionRequest {
            language: "shell".to_string(),
            code: "pwd".to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        };

        let unit = runtime.spawn(&request).await.unwrap();
        let output = unit.child.wait_with_output().await.unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reported = std::path::PathBuf::from(stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            scratch.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_spawn_clears_environment() {
        std::env::set_var("WARDEN_TEST_SECRET", "leaky");
        let scratch = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::new();
        let request = ExecutionRequest {
            language: "shell".to_string(),
            code: "echo \"secret=${WARDEN_TEST_SECRET:-unset}\"".to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        };

        let unit = runtime.spawn(&request).await.unwrap();
        let output = unit.child.wait_with_output().await.unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("secret=unset"));
        std::env::remove_var("WARDEN_TEST_SECRET");
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::new();
        let request = ExecutionRequest {
            language: "cobol".to_string(),
            code: "DISPLAY 'HI'".to_string(),
            scratch_dir: scratch.path().to_path_buf(),
        };
        assert!(matches!(
            runtime.spawn(&request).await,
            Err(EngineError::Validation(_))
        ));
    }
}
