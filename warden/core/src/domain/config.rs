// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engine configuration document.
//!
//! The engine treats configuration as read-only input provided by the
//! configuration subsystem and refreshed on a hot-reload event; it never
//! writes back to the configuration store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enable_sandboxing: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    /// Root under which tool file access is permitted.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Root for temp files and per-invocation scratch directories.
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,
    /// Optional global ceilings clamped onto every invocation's effective
    /// limits, whatever its level or per-tool override says.
    #[serde(default, with = "humantime_serde::option")]
    pub max_execution_time: Option<Duration>,
    #[serde(default)]
    pub max_memory_usage: Option<u64>,
    #[serde(default)]
    pub max_cpu_percent: Option<f64>,
    #[serde(default = "default_allowed_file_types")]
    pub allowed_file_types: Vec<String>,
    #[serde(default = "default_blocked_file_types")]
    pub blocked_file_types: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,
    #[serde(default = "default_max_network_requests")]
    pub max_network_requests: u32,
    #[serde(default = "default_true")]
    pub enable_audit_logging: bool,
    /// JSONL sink for the audit trail. `None` keeps the trail in memory only.
    #[serde(default)]
    pub audit_log_file: Option<PathBuf>,
    /// In-memory audit retention cap; oldest events are pruned beyond it.
    #[serde(default = "default_max_audit_events")]
    pub max_audit_events: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    4
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}

fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("warden")
}

fn default_allowed_file_types() -> Vec<String> {
    [".txt", ".md", ".py", ".json", ".csv", ".xml", ".html", ".css", ".js"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_blocked_file_types() -> Vec<String> {
    [".exe", ".bat", ".cmd", ".com", ".scr", ".pif", ".vbs", ".jar"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_blocked_domains() -> Vec<String> {
    vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "0.0.0.0".to_string(),
    ]
}

fn default_max_network_requests() -> u32 {
    10
}

fn default_max_audit_events() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_sandboxing: true,
            max_concurrent_executions: default_max_concurrent(),
            workspace_root: default_workspace_root(),
            scratch_root: default_scratch_root(),
            max_execution_time: None,
            max_memory_usage: None,
            max_cpu_percent: None,
            allowed_file_types: default_allowed_file_types(),
            blocked_file_types: default_blocked_file_types(),
            max_file_size: default_max_file_size(),
            allowed_domains: Vec::new(),
            blocked_domains: default_blocked_domains(),
            max_network_requests: default_max_network_requests(),
            enable_audit_logging: true,
            audit_log_file: None,
            max_audit_events: default_max_audit_events(),
        }
    }
}

impl EngineConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml(doc: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yaml::from_str(doc)
            .map_err(|e| EngineError::Configuration(format!("invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_executions == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(EngineError::Configuration(
                "max_file_size must be non-zero".to_string(),
            ));
        }
        if self.max_audit_events == 0 {
            return Err(EngineError::Configuration(
                "max_audit_events must be non-zero".to_string(),
            ));
        }
        if let Some(cpu) = self.max_cpu_percent {
            if cpu <= 0.0 || cpu > 100.0 {
                return Err(EngineError::Configuration(format!(
                    "max_cpu_percent must be within (0, 100], got {}",
                    cpu
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = EngineConfig::from_yaml("enable_sandboxing: false\n").unwrap();
        assert!(!config.enable_sandboxing);
        assert_eq!(config.max_network_requests, 10);
        assert!(config.blocked_domains.contains(&"localhost".to_string()));
    }

    #[test]
    fn test_from_yaml_parses_global_ceilings() {
        let config =
            EngineConfig::from_yaml("max_execution_time: 5s\nmax_memory_usage: 1048576\n").unwrap();
        assert_eq!(config.max_execution_time, Some(Duration::from_secs(5)));
        assert_eq!(config.max_memory_usage, Some(1024 * 1024));
        assert_eq!(config.max_cpu_percent, None);
    }

    #[test]
    fn test_validate_rejects_out_of_range_cpu_ceiling() {
        let config = EngineConfig {
            max_cpu_percent: Some(250.0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        assert!(matches!(
            EngineConfig::from_yaml(": not yaml ["),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = EngineConfig {
            max_concurrent_executions: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }
}
