// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool metadata and configuration value objects.
//!
//! [`ToolMetadata`] is created once at registration and immutable
//! thereafter. [`ToolConfiguration`] is the mutable, hot-reloadable layer on
//! top of it, owned by the registry; a tool never holds its own mutable
//! copy and always reads the current configuration through the registry at
//! invocation time.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::error::EngineError;
use crate::domain::policy::{validate_override, ResourceLimits, SecurityLevel};

/// Functional category of a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Utility,
    DataProcessing,
    ExternalApi,
    FileOperations,
    CodeExecution,
    Network,
    Custom,
}

/// Immutable registration metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique key; the registry rejects duplicates.
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub security_level: SecurityLevel,
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ToolMetadata {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        security_level: SecurityLevel,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            security_level,
            version: "1.0.0".to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Registration-time validation. Fails closed: a partially valid tool is
    /// never registered.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "tool name must be non-empty".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(EngineError::Validation(
                "tool version must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_RETRIES_CEILING: u32 = 10;

/// Mutable per-tool settings, layered on top of [`ToolMetadata`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfiguration {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Optional override of the declared security level. The effective level
    /// is the stricter of the two; an override can never loosen the declared
    /// level.
    #[serde(default)]
    pub security_level_override: Option<SecurityLevel>,
    /// Optional per-tool resource ceilings, merged field-wise (stricter
    /// wins) with the level defaults.
    #[serde(default)]
    pub resource_override: Option<ResourceLimits>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub allowed_file_types: Vec<String>,
    #[serde(default)]
    pub blocked_file_types: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ToolConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            security_level_override: None,
            resource_override: None,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            max_file_size: None,
            allowed_file_types: Vec::new(),
            blocked_file_types: Vec::new(),
        }
    }
}

impl ToolConfiguration {
    /// Validate ranges. Timeout must be within 1..=300 seconds, retries
    /// within 0..=10, and any resource override must be well-formed.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(EngineError::Validation(format!(
                "timeout must be between {}s and {}s, got {:?}",
                MIN_TIMEOUT.as_secs(),
                MAX_TIMEOUT.as_secs(),
                self.timeout
            )));
        }
        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(EngineError::Validation(format!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_CEILING, self.max_retries
            )));
        }
        if let Some(ref overrides) = self.resource_override {
            validate_override(overrides)?;
        }
        if let Some(0) = self.max_file_size {
            return Err(EngineError::Validation(
                "max_file_size must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective security level: the stricter of the declared level and the
    /// configured override.
    pub fn effective_level(&self, declared: SecurityLevel) -> SecurityLevel {
        match self.security_level_override {
            Some(level) => level.max(declared),
            None => declared,
        }
    }
}

/// Partial update applied by `ToolRegistry::update_configuration`.
///
/// `None` fields leave the current value untouched. The patched
/// configuration is validated as a whole before it is committed, so a bad
/// patch never leaves a half-applied state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfigurationPatch {
    pub enabled: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub security_level_override: Option<SecurityLevel>,
    pub resource_override: Option<ResourceLimits>,
    pub allowed_domains: Option<Vec<String>>,
    pub blocked_domains: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    pub allowed_file_types: Option<Vec<String>>,
    pub blocked_file_types: Option<Vec<String>>,
}

impl ToolConfigurationPatch {
    pub fn apply(&self, config: &mut ToolConfiguration) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(level) = self.security_level_override {
            config.security_level_override = Some(level);
        }
        if let Some(ref overrides) = self.resource_override {
            config.resource_override = Some(overrides.clone());
        }
        if let Some(ref domains) = self.allowed_domains {
            config.allowed_domains = domains.clone();
        }
        if let Some(ref domains) = self.blocked_domains {
            config.blocked_domains = domains.clone();
        }
        if let Some(size) = self.max_file_size {
            config.max_file_size = Some(size);
        }
        if let Some(ref types) = self.allowed_file_types {
            config.allowed_file_types = types.clone();
        }
        if let Some(ref types) = self.blocked_file_types {
            config.blocked_file_types = types.clone();
        }
    }
}
