// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandboxed execution orchestration.
//!
//! Wires one invocation through screening, a per-invocation scratch
//! directory, a fresh execution unit and the resource monitor. On a limit
//! breach the unit is killed with SIGKILL and whatever partial output was
//! captured is still returned, flagged with `terminated_by_limit`. The
//! scratch directory is removed on every exit path.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use serde_json::json;

use crate::domain::error::EngineError;
use crate::domain::events::SecurityEventType;
use crate::domain::policy::ResourceLimits;
use crate::domain::sandbox::{ExecutionRequest, ExecutionResult, SandboxRuntime};
use crate::domain::screening::CodeScreener;
use crate::domain::security_context::SecurityContext;
use crate::infrastructure::file_access::FileAccessValidator;
use crate::infrastructure::monitor::{LimitBreach, ResourceMonitor};

/// Result of one sandboxed execution plus the breach that ended it, if any.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub breach: Option<LimitBreach>,
}

/// Runs untrusted code in isolated execution units.
pub struct SandboxExecutor {
    runtime: Arc<dyn SandboxRuntime>,
    monitor: ResourceMonitor,
    files: Arc<FileAccessValidator>,
    screener: CodeScreener,
}

impl SandboxExecutor {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        monitor: ResourceMonitor,
        files: Arc<FileAccessValidator>,
    ) -> Self {
        Self {
            runtime,
            monitor,
            files,
            screener: CodeScreener::new(),
        }
    }

    /// Execute `code` in a fresh, supervised unit.
    ///
    /// # Errors
    ///
    /// `SecurityViolation` when screening rejects the submission;
    /// `Internal` when the unit cannot be spawned or supervised. A failure
    /// *inside* the unit is a non-zero exit code in the outcome, not an
    /// error; a limit breach is a flagged outcome.
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
        limits: &ResourceLimits,
        ctx: &SecurityContext,
    ) -> Result<ExecutionOutcome, EngineError> {
        let violations = self.screener.screen(language, code);
        if !violations.is_empty() {
            let reason = violations.join("; ");
            ctx.log_operation(
                SecurityEventType::SecurityViolation,
                json!({"kind": "code_screening", "language": language, "violations": violations}),
            );
            return Err(EngineError::SecurityViolation(format!(
                "code screening failed: {}",
                reason
            )));
        }

        let scratch_dir = self.files.create_scratch_dir(ctx)?;
        // Scratch removal must happen on every exit path, including `?`.
        let _scratch_guard = scopeguard::guard(scratch_dir.clone(), |path| {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %e, "scratch dir removal failed");
            }
        });

        let request = ExecutionRequest {
            language: language.to_string(),
            code: code.to_string(),
            scratch_dir,
        };
        let spawned = self.runtime.spawn(&request).await?;
        let mut child = spawned.child;
        let pid = spawned.pid;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Internal("unit stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Internal("unit stderr not piped".to_string()))?;
        let stdout_task = tokio::spawn(read_stream(stdout));
        let stderr_task = tokio::spawn(read_stream(stderr));

        let token = CancellationToken::new();
        let monitor_task = {
            let monitor = self.monitor.clone();
            let limits = limits.clone();
            let token = token.clone();
            tokio::spawn(async move { monitor.supervise(pid, limits, token).await })
        };

        let exit_status = tokio::select! {
            status = child.wait() => {
                // Unit finished on its own; stop the monitor.
                token.cancel();
                status.map_err(|e| EngineError::Internal(format!("wait on unit failed: {}", e)))?
            }
            _ = token.cancelled() => {
                // Forced termination: SIGKILL to the whole process group, no
                // opportunity to intercept.
                kill_unit(pid);
                if let Err(e) = child.start_kill() {
                    debug!(pid = pid, error = %e, "unit already gone at kill time");
                }
                child
                    .wait()
                    .await
                    .map_err(|e| EngineError::Internal(format!("reap after kill failed: {}", e)))?
            }
        };

        let report = monitor_task
            .await
            .map_err(|e| EngineError::Internal(format!("monitor task failed: {}", e)))?;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let result = ExecutionResult {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code: exit_status.code(),
            resource_usage: report.usage,
            terminated_by_limit: report.breach.is_some(),
        };
        debug!(
            pid = pid,
            exit_code = ?result.exit_code,
            terminated_by_limit = result.terminated_by_limit,
            elapsed_ms = result.resource_usage.elapsed.as_millis() as u64,
            "sandboxed unit finished"
        );

        Ok(ExecutionOutcome {
            result,
            breach: report.breach,
        })
    }
}

async fn read_stream<R: AsyncReadExt + Unpin>(mut stream: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    buf
}

/// SIGKILL the unit's whole process group so descendants holding the output
/// pipes die with it.
#[cfg(unix)]
fn kill_unit(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_unit(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventSink;
    use crate::domain::policy::SecurityLevel;
    use crate::domain::sandbox::ResourceUsage;
    use crate::infrastructure::audit::AuditLog;
    use crate::infrastructure::file_access::{FileAccessSettings, FileAccessValidator};
    use crate::infrastructure::process_runtime::ProcessRuntime;
    use std::time::Duration;

    fn executor() -> (SandboxExecutor, Arc<AuditLog>, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::new(1000));
        let settings = FileAccessSettings {
            workspace_root: root.path().join("workspace"),
            scratch_root: root.path().join("scratch"),
            allowed_file_types: vec![],
            blocked_file_types: vec![],
            max_file_size: 10 * 1024 * 1024,
        };
        let files =
            Arc::new(FileAccessValidator::new(settings, audit.clone() as Arc<dyn EventSink>).unwrap());
        let executor = SandboxExecutor::new(
            Arc::new(ProcessRuntime::new()),
            ResourceMonitor::with_interval(Duration::from_millis(20)),
            files,
        );
        (executor, audit, root)
    }

    fn ctx(audit: Arc<AuditLog>) -> SecurityContext {
        SecurityContext::new(Some("tester".to_string()), audit)
    }

    fn limits(max_execution_time: Duration) -> ResourceLimits {
        ResourceLimits {
            max_execution_time,
            ..SecurityLevel::Low.default_limits()
        }
    }

    #[tokio::test]
    async fn test_shell_execution_captures_output() {
        let (executor, audit, _root) = executor();
        let ctx = ctx(audit);
        let outcome = executor
            .execute("echo hello", "shell", &limits(Duration::from_secs(10)), &ctx)
            .await
            .unwrap();

        assert_eq!(outcome.result.exit_code, Some(0));
        assert!(outcome.result.stdout.contains("hello"));
        assert!(!outcome.result.terminated_by_limit);
        assert!(outcome.result.success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured_not_raised() {
        let (executor, audit, _root) = executor();
        let ctx = ctx(audit);
        let outcome = executor
            .execute(
                "echo oops >&2; exit 3",
                "shell",
                &limits(Duration::from_secs(10)),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(outcome.result.exit_code, Some(3));
        assert!(outcome.result.stderr.contains("oops"));
        assert!(!outcome.result.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_near_the_limit() {
        let (executor, audit, _root) = executor();
        let ctx = ctx(audit);
        let started = std::time::Instant::now();
        let outcome = executor
            .execute(
                "echo partial; sleep 10; echo never",
                "shell",
                &limits(Duration::from_millis(400)),
                &ctx,
            )
            .await
            .unwrap();

        assert!(outcome.result.terminated_by_limit);
        assert_eq!(outcome.breach, Some(LimitBreach::WallClock));
        // Killed near the 400ms limit, not after the 10s workload.
        assert!(started.elapsed() < Duration::from_secs(3));
        // Partial output before the kill is preserved.
        assert!(outcome.result.stdout.contains("partial"));
        assert!(!outcome.result.stdout.contains("never"));
    }

    #[tokio::test]
    async fn test_screening_rejection_logs_violation() {
        let (executor, audit, _root) = executor();
        let ctx = ctx(audit);
        let result = executor
            .execute(
                "import subprocess",
                "python",
                &limits(Duration::from_secs(5)),
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
        let violations: Vec<_> = ctx
            .events()
            .into_iter()
            .filter(|e| e.event_type == SecurityEventType::SecurityViolation)
            .collect();
        assert_eq!(violations.len(), 1);
    }

    #[tokio::test]
    async fn test_scratch_dir_removed_after_execution() {
        let (executor, audit, root) = executor();
        let ctx = ctx(audit);
        executor
            .execute("echo done", "shell", &limits(Duration::from_secs(10)), &ctx)
            .await
            .unwrap();

        let scratch_root = root.path().join("scratch");
        let leftovers: Vec<_> = std::fs::read_dir(&scratch_root).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_usage_default_is_zeroed() {
        let usage = ResourceUsage::default();
        assert_eq!(usage.peak_memory_bytes, 0);
        assert!(usage.elapsed.is_zero());
    }
}
