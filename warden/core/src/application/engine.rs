// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! The security engine.
//!
//! Constructed once at process start and handed by reference to every
//! collaborator that needs it; there is no ambient global security state.
//! [`SecurityEngine::invoke`] is the single entry point used by everything
//! outside this core: it resolves the tool through the registry, derives the
//! effective resource limits, takes a global concurrency permit, routes
//! code-execution tools through the sandbox executor and everything else
//! through the tool's own handler, and emits `tool_start` plus exactly one
//! terminal event per invocation.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::application::registry::{ToolHandler, ToolRegistry};
use crate::application::sandbox_executor::SandboxExecutor;
use crate::domain::config::EngineConfig;
use crate::domain::error::EngineError;
use crate::domain::events::{EventSink, SecurityEvent, SecurityEventType};
use crate::domain::policy::{effective_limits, ResourceLimits, SecurityLevel};
use crate::domain::sandbox::{ExecutionResult, ResourceUsage};
use crate::domain::security_context::{OperationId, SecurityContext};
use crate::domain::tool::{ToolCategory, ToolConfiguration, ToolMetadata};
use crate::infrastructure::audit::{AuditLog, AuditStats};
use crate::infrastructure::file_access::{FileAccessSettings, FileAccessValidator};
use crate::infrastructure::monitor::ResourceMonitor;
use crate::infrastructure::network_access::{NetworkAccessSettings, NetworkAccessValidator};
use crate::infrastructure::process_runtime::ProcessRuntime;

pub struct SecurityEngine {
    registry: Arc<ToolRegistry>,
    files: Arc<FileAccessValidator>,
    network: Arc<NetworkAccessValidator>,
    executor: Arc<SandboxExecutor>,
    audit: Arc<AuditLog>,
    config: RwLock<EngineConfig>,
    permits: RwLock<Arc<Semaphore>>,
}

impl SecurityEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let audit = match (&config.audit_log_file, config.enable_audit_logging) {
            (Some(path), true) => Arc::new(AuditLog::with_file(config.max_audit_events, path)?),
            _ => Arc::new(AuditLog::new(config.max_audit_events)),
        };

        let files = Arc::new(FileAccessValidator::new(
            FileAccessSettings::from_config(&config),
            audit.clone() as Arc<dyn EventSink>,
        )?);
        let network = Arc::new(NetworkAccessValidator::new(
            NetworkAccessSettings::from_config(&config),
        ));
        let executor = Arc::new(SandboxExecutor::new(
            Arc::new(ProcessRuntime::new()),
            ResourceMonitor::new(),
            files.clone(),
        ));
        let permits = RwLock::new(Arc::new(Semaphore::new(config.max_concurrent_executions)));

        info!(
            max_concurrent = config.max_concurrent_executions,
            sandboxing = config.enable_sandboxing,
            "security engine initialized"
        );

        Ok(Self {
            registry: Arc::new(ToolRegistry::new()),
            files,
            network,
            executor,
            audit,
            config: RwLock::new(config),
            permits,
        })
    }

    /// Create the per-operation context that threads through every check.
    pub fn new_context(&self, user_id: Option<String>) -> SecurityContext {
        SecurityContext::new(user_id, self.audit.clone() as Arc<dyn EventSink>)
    }

    /// Finish an operation: reset its network quota and reclaim any temp
    /// files it still owns.
    pub fn end_context(&self, ctx: &SecurityContext) {
        self.network.end_context(ctx.operation_id());
        self.files.sweep_context(ctx.operation_id());
        debug!(operation_id = %ctx.operation_id(), elapsed_ms = ctx.elapsed().as_millis() as u64, "operation context ended");
    }

    /// Invoke a registered, enabled tool.
    pub async fn invoke(
        &self,
        tool_name: &str,
        params: Value,
        ctx: &SecurityContext,
    ) -> Result<Value, EngineError> {
        self.invoke_with_min_level(tool_name, params, None, ctx).await
    }

    /// Invoke with a caller-supplied minimum security level; the tool's
    /// effective level must be at least as strict.
    pub async fn invoke_with_min_level(
        &self,
        tool_name: &str,
        params: Value,
        min_level: Option<SecurityLevel>,
        ctx: &SecurityContext,
    ) -> Result<Value, EngineError> {
        let (metadata, tool_config, handler) = self.registry.resolve(tool_name)?;
        let effective = tool_config.effective_level(metadata.security_level);

        if let Some(min) = min_level {
            if effective < min {
                warn!(tool = tool_name, effective = %effective, required = %min, "security level below caller minimum");
                ctx.log_operation(
                    SecurityEventType::SecurityViolation,
                    json!({
                        "kind": "security_level",
                        "tool": tool_name,
                        "effective": effective.to_string(),
                        "required": min.to_string(),
                    }),
                );
                return Err(EngineError::SecurityViolation(format!(
                    "tool {} runs at level {} but the caller requires at least {}",
                    tool_name, effective, min
                )));
            }
        }

        let mut limits = effective_limits(effective, tool_config.resource_override.as_ref())?;
        {
            // Global ceilings from configuration clamp every invocation.
            let config = self.config.read();
            if let Some(ceiling) = config.max_execution_time {
                limits.max_execution_time = limits.max_execution_time.min(ceiling);
            }
            if let Some(ceiling) = config.max_memory_usage {
                limits.max_memory_bytes = limits.max_memory_bytes.min(ceiling);
            }
            if let Some(ceiling) = config.max_cpu_percent {
                limits.max_cpu_percent = limits.max_cpu_percent.min(ceiling);
            }
        }

        // Global concurrency cap; the permit is held for the whole
        // invocation.
        let semaphore = self.permits.read().clone();
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Internal("concurrency gate closed".to_string()))?;

        ctx.log_operation(
            SecurityEventType::ToolStart,
            json!({
                "tool": tool_name,
                "category": metadata.category,
                "security_level": effective.to_string(),
            }),
        );

        let sandboxing = self.config.read().enable_sandboxing;
        if metadata.category == ToolCategory::CodeExecution && sandboxing {
            self.invoke_sandboxed(&metadata, &params, &limits, ctx).await
        } else {
            self.invoke_direct(&metadata, &tool_config, &limits, params, handler, ctx)
                .await
        }
    }

    async fn invoke_sandboxed(
        &self,
        metadata: &ToolMetadata,
        params: &Value,
        limits: &ResourceLimits,
        ctx: &SecurityContext,
    ) -> Result<Value, EngineError> {
        let Some(code) = params.get("code").and_then(Value::as_str) else {
            let err = EngineError::Validation(
                "code execution params must include a string field 'code'".to_string(),
            );
            ctx.log_operation(
                SecurityEventType::ToolError,
                json!({"tool": metadata.name, "error": err.to_string()}),
            );
            return Err(err);
        };
        let language = params
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("python");

        match self.executor.execute(code, language, limits, ctx).await {
            Ok(outcome) => {
                if let Some(breach) = outcome.breach {
                    ctx.log_operation(
                        SecurityEventType::ResourceLimitExceeded,
                        json!({
                            "tool": metadata.name,
                            "breach": breach.to_string(),
                            "elapsed_ms": outcome.result.resource_usage.elapsed.as_millis() as u64,
                        }),
                    );
                    return Err(EngineError::ResourceLimitExceeded {
                        breach: breach.to_string(),
                        result: Box::new(outcome.result),
                    });
                }

                let result = outcome.result;
                if result.exit_code == Some(0) {
                    ctx.log_operation(
                        SecurityEventType::ToolSuccess,
                        json!({
                            "tool": metadata.name,
                            "elapsed_ms": result.resource_usage.elapsed.as_millis() as u64,
                        }),
                    );
                } else {
                    // The unit failed on its own terms; that is a captured
                    // result, not an engine error.
                    ctx.log_operation(
                        SecurityEventType::ToolError,
                        json!({"tool": metadata.name, "exit_code": result.exit_code}),
                    );
                }
                serde_json::to_value(&result)
                    .map_err(|e| EngineError::Internal(format!("result serialization: {}", e)))
            }
            Err(e) => {
                ctx.log_operation(
                    SecurityEventType::ToolError,
                    json!({"tool": metadata.name, "error": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    async fn invoke_direct(
        &self,
        metadata: &ToolMetadata,
        tool_config: &ToolConfiguration,
        limits: &ResourceLimits,
        params: Value,
        handler: Arc<dyn ToolHandler>,
        ctx: &SecurityContext,
    ) -> Result<Value, EngineError> {
        let budget = tool_config.timeout.min(limits.max_execution_time);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match tokio::time::timeout(budget, handler.call(params.clone(), ctx)).await {
                Err(_) => {
                    // Cooperative tools get a hard deadline instead of a
                    // kill; surface it the same way as a sandbox breach.
                    ctx.log_operation(
                        SecurityEventType::ResourceLimitExceeded,
                        json!({
                            "tool": metadata.name,
                            "breach": "wall_clock",
                            "elapsed_ms": budget.as_millis() as u64,
                        }),
                    );
                    return Err(EngineError::ResourceLimitExceeded {
                        breach: "wall_clock".to_string(),
                        result: Box::new(ExecutionResult {
                            stdout: String::new(),
                            stderr: String::new(),
                            exit_code: None,
                            resource_usage: ResourceUsage {
                                elapsed: budget,
                                ..Default::default()
                            },
                            terminated_by_limit: true,
                        }),
                    });
                }
                Ok(Ok(output)) => {
                    ctx.log_operation(
                        SecurityEventType::ToolSuccess,
                        json!({"tool": metadata.name, "attempts": attempt}),
                    );
                    return Ok(output);
                }
                Ok(Err(e)) => {
                    // Retries cover transient engine faults in idempotent
                    // invocations only; denials and validation failures are
                    // final, and sandboxed executions are never re-run.
                    let transient = matches!(e, EngineError::Internal(_));
                    if transient && attempt <= tool_config.max_retries {
                        debug!(tool = %metadata.name, attempt = attempt, "retrying after transient failure");
                        continue;
                    }
                    ctx.log_operation(
                        SecurityEventType::ToolError,
                        json!({"tool": metadata.name, "error": e.to_string(), "attempts": attempt}),
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Hot-reload the engine configuration. The document is read-only input;
    /// the engine never writes back to the configuration store.
    pub fn apply_config(&self, new_config: EngineConfig) -> Result<(), EngineError> {
        new_config.validate()?;
        self.files
            .update_settings(FileAccessSettings::from_config(&new_config))?;
        self.network
            .update_settings(NetworkAccessSettings::from_config(&new_config));

        {
            let mut current = self.config.write();
            if current.max_concurrent_executions != new_config.max_concurrent_executions {
                *self.permits.write() =
                    Arc::new(Semaphore::new(new_config.max_concurrent_executions));
            }
            *current = new_config;
        }

        self.audit.record(SecurityEvent::new(
            SecurityEventType::ConfigReloaded,
            OperationId::new(),
            None,
            json!({}),
        ));
        info!("engine configuration reloaded");
        Ok(())
    }

    /// Aggregate audit statistics.
    pub fn stats(&self) -> AuditStats {
        self.audit.stats()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn file_validator(&self) -> Arc<FileAccessValidator> {
        self.files.clone()
    }

    pub fn network_validator(&self) -> Arc<NetworkAccessValidator> {
        self.network.clone()
    }

    pub fn sandbox_executor(&self) -> Arc<SandboxExecutor> {
        self.executor.clone()
    }

    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }
}
