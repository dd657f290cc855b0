// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool registry.
//!
//! The single gate through which a tool becomes invocable: nothing may reach
//! the sandbox executor or the validators for a tool that is not registered
//! and enabled here. Registration is explicit — tool authors construct a
//! [`ToolMetadata`] value and call [`ToolRegistry::register`]; there are no
//! implicit side effects from type definitions.
//!
//! Reads are lock-free snapshots; configuration writes are serialized per
//! entry so no invocation observes a half-applied change.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::error::EngineError;
use crate::domain::policy::SecurityLevel;
use crate::domain::security_context::SecurityContext;
use crate::domain::tool::{
    ToolCategory, ToolConfiguration, ToolConfigurationPatch, ToolMetadata,
};

/// The capability interface a tool implements: one async entry point taking
/// the parameters and the caller's security context. Checked at
/// registration time, not at call time.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &SecurityContext) -> Result<Value, EngineError>;
}

struct ToolEntry {
    metadata: ToolMetadata,
    configuration: ToolConfiguration,
    handler: Arc<dyn ToolHandler>,
}

/// Binds tool identity to metadata, configuration and entry point.
pub struct ToolRegistry {
    tools: DashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Register a tool exactly once per name.
    ///
    /// Fails closed: invalid metadata or configuration rejects the whole
    /// registration, and a duplicate name leaves the existing entry
    /// untouched.
    pub fn register(
        &self,
        metadata: ToolMetadata,
        configuration: ToolConfiguration,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), EngineError> {
        metadata.validate()?;
        configuration.validate()?;

        let name = metadata.name.clone();
        match self.tools.entry(name.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicateTool(name)),
            Entry::Vacant(vacant) => {
                info!(
                    tool = %name,
                    category = ?metadata.category,
                    security_level = %metadata.security_level,
                    "tool registered"
                );
                vacant.insert(ToolEntry {
                    metadata,
                    configuration,
                    handler,
                });
                Ok(())
            }
        }
    }

    /// Snapshot of a tool's metadata and current configuration.
    pub fn get(&self, name: &str) -> Option<(ToolMetadata, ToolConfiguration)> {
        self.tools
            .get(name)
            .map(|entry| (entry.metadata.clone(), entry.configuration.clone()))
    }

    /// Resolve a tool for invocation: it must exist and be enabled.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(ToolMetadata, ToolConfiguration, Arc<dyn ToolHandler>), EngineError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        if !entry.configuration.enabled {
            return Err(EngineError::ToolDisabled(name.to_string()));
        }
        Ok((
            entry.metadata.clone(),
            entry.configuration.clone(),
            entry.handler.clone(),
        ))
    }

    /// List registered tools, optionally filtered by category and by a
    /// minimum effective security level.
    pub fn list(
        &self,
        category: Option<ToolCategory>,
        min_security_level: Option<SecurityLevel>,
    ) -> Vec<ToolMetadata> {
        let mut tools: Vec<ToolMetadata> = self
            .tools
            .iter()
            .filter(|entry| category.map_or(true, |c| entry.metadata.category == c))
            .filter(|entry| {
                min_security_level.map_or(true, |min| {
                    entry
                        .configuration
                        .effective_level(entry.metadata.security_level)
                        >= min
                })
            })
            .map(|entry| entry.metadata.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), EngineError> {
        let mut entry = self
            .tools
            .get_mut(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;
        entry.configuration.enabled = enabled;
        debug!(tool = name, enabled = enabled, "tool enablement changed");
        Ok(())
    }

    /// Apply a partial configuration update. The patched configuration is
    /// validated before commit, so an invalid patch changes nothing.
    pub fn update_configuration(
        &self,
        name: &str,
        patch: &ToolConfigurationPatch,
    ) -> Result<(), EngineError> {
        let mut entry = self
            .tools
            .get_mut(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        let mut updated = entry.configuration.clone();
        patch.apply(&mut updated);
        updated.validate()?;

        entry.configuration = updated;
        debug!(tool = name, "tool configuration updated");
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<(), EngineError> {
        self.tools
            .remove(name)
            .map(|_| info!(tool = name, "tool unregistered"))
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
