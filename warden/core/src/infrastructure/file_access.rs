// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Filesystem access validation and scoped temp-file lifecycle.
//!
//! Paths are reduced to an absolute canonical form before any decision so
//! `..`-traversal and symlinked parents cannot escape the configured roots.
//! Every denial produces exactly one `security_violation` event and an
//! error; validation never silently allows on failure.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::config::EngineConfig;
use crate::domain::error::EngineError;
use crate::domain::events::{EventSink, SecurityEvent, SecurityEventType};
use crate::domain::security_context::{OperationId, SecurityContext};

const MAX_PATH_LEN: usize = 4096;

/// Requested filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileOperation::Read => "read",
            FileOperation::Write => "write",
            FileOperation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Hot-reloadable validator settings.
#[derive(Debug, Clone)]
pub struct FileAccessSettings {
    pub workspace_root: PathBuf,
    pub scratch_root: PathBuf,
    pub allowed_file_types: Vec<String>,
    pub blocked_file_types: Vec<String>,
    pub max_file_size: u64,
}

impl FileAccessSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            scratch_root: config.scratch_root.clone(),
            allowed_file_types: config.allowed_file_types.clone(),
            blocked_file_types: config.blocked_file_types.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

/// Handle to a temp file owned by one operation. Release is guaranteed by
/// the owning operation's exit paths; a sweep reclaims handles whose
/// context has expired.
#[derive(Debug)]
pub struct TempFileHandle {
    id: Uuid,
    path: PathBuf,
    owner: OperationId,
}

impl TempFileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> OperationId {
        self.owner
    }
}

struct TempEntry {
    path: PathBuf,
    owner: OperationId,
}

/// Decides whether a path/operation pair is permitted and manages safe
/// temporary-file lifecycle.
pub struct FileAccessValidator {
    settings: RwLock<FileAccessSettings>,
    temp_files: DashMap<Uuid, TempEntry>,
    sink: Arc<dyn EventSink>,
}

impl FileAccessValidator {
    /// Create the validator, ensuring both roots exist so they can be
    /// canonicalized for containment checks.
    pub fn new(
        settings: FileAccessSettings,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        for root in [&settings.workspace_root, &settings.scratch_root] {
            std::fs::create_dir_all(root).map_err(|e| {
                EngineError::Configuration(format!(
                    "cannot create access root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            settings: RwLock::new(settings),
            temp_files: DashMap::new(),
            sink,
        })
    }

    /// Replace the active settings (hot reload).
    pub fn update_settings(&self, settings: FileAccessSettings) -> Result<(), EngineError> {
        for root in [&settings.workspace_root, &settings.scratch_root] {
            std::fs::create_dir_all(root).map_err(|e| {
                EngineError::Configuration(format!(
                    "cannot create access root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }
        *self.settings.write() = settings;
        Ok(())
    }

    /// Validate a path/operation pair. Returns the resolved absolute path on
    /// success so callers operate on exactly what was validated.
    pub fn validate_access(
        &self,
        path: &str,
        operation: FileOperation,
        ctx: &SecurityContext,
    ) -> Result<PathBuf, EngineError> {
        let settings = self.settings.read().clone();

        if path.len() > MAX_PATH_LEN {
            return Err(self.deny(path, operation, "path too long", ctx));
        }
        if path.contains('\0') {
            return Err(self.deny(path, operation, "path contains null byte", ctx));
        }

        let candidate = PathBuf::from(path);
        for component in candidate.components() {
            if component == Component::ParentDir {
                return Err(self.deny(path, operation, "path traversal attempt", ctx));
            }
        }

        // Normalize and absolutize against the workspace root.
        let mut normalized = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => normalized.push(component),
                Component::CurDir => {}
                Component::Normal(part) => normalized.push(part),
                Component::ParentDir => {
                    return Err(self.deny(path, operation, "path traversal attempt", ctx));
                }
            }
        }
        let absolute = if normalized.is_absolute() {
            normalized
        } else {
            settings.workspace_root.join(normalized)
        };

        // Resolve symlinks through the deepest existing ancestor; the
        // remainder (not yet created) cannot change the containment result.
        let resolved = match resolve_existing_prefix(&absolute) {
            Ok(resolved) => resolved,
            Err(e) => {
                return Err(self.deny(
                    path,
                    operation,
                    &format!("path resolution failed: {}", e),
                    ctx,
                ));
            }
        };

        let mut inside_root = false;
        for root in [&settings.workspace_root, &settings.scratch_root] {
            if let Ok(canonical_root) = root.canonicalize() {
                if resolved.starts_with(&canonical_root) {
                    inside_root = true;
                    break;
                }
            }
        }
        if !inside_root {
            return Err(self.deny(path, operation, "path outside configured roots", ctx));
        }

        // Extension policy applies to files, not directories. Blocked list
        // wins over the allowed list.
        if !resolved.is_dir() {
            let extension = resolved
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e.to_lowercase()));
            if let Some(ref ext) = extension {
                if settings.blocked_file_types.iter().any(|b| b == ext) {
                    return Err(self.deny(
                        path,
                        operation,
                        &format!("blocked file type {}", ext),
                        ctx,
                    ));
                }
            }
            if !settings.allowed_file_types.is_empty() {
                match extension {
                    Some(ref ext) if settings.allowed_file_types.iter().any(|a| a == ext) => {}
                    _ => {
                        return Err(self.deny(path, operation, "file type not allowed", ctx));
                    }
                }
            }
        }

        if matches!(operation, FileOperation::Read | FileOperation::Write)
            && resolved.is_file()
        {
            let size = match resolved.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    return Err(self.deny(
                        path,
                        operation,
                        &format!("cannot stat target: {}", e),
                        ctx,
                    ));
                }
            };
            if size > settings.max_file_size {
                return Err(self.deny(
                    path,
                    operation,
                    &format!(
                        "file size {} exceeds limit {}",
                        size, settings.max_file_size
                    ),
                    ctx,
                ));
            }
        }

        ctx.log_operation(
            SecurityEventType::FileAccess,
            json!({
                "path": resolved.display().to_string(),
                "operation": operation.to_string(),
                "allowed": true,
            }),
        );
        Ok(resolved)
    }

    fn deny(
        &self,
        path: &str,
        operation: FileOperation,
        reason: &str,
        ctx: &SecurityContext,
    ) -> EngineError {
        warn!(path = path, operation = %operation, reason = reason, "file access denied");
        ctx.log_operation(
            SecurityEventType::SecurityViolation,
            json!({
                "kind": "file_access",
                "path": path,
                "operation": operation.to_string(),
                "reason": reason,
            }),
        );
        EngineError::SecurityViolation(format!(
            "file {} access to {} denied: {}",
            operation, path, reason
        ))
    }

    /// Create a temp file under the scratch root, scoped to the calling
    /// operation.
    pub fn create_scoped_temp_file(
        &self,
        prefix: &str,
        suffix: &str,
        ctx: &SecurityContext,
    ) -> Result<TempFileHandle, EngineError> {
        let scratch_root = self.settings.read().scratch_root.clone();
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&scratch_root)
            .map_err(|e| EngineError::Internal(format!("temp file creation failed: {}", e)))?;
        let (_, path) = file
            .keep()
            .map_err(|e| EngineError::Internal(format!("temp file persist failed: {}", e)))?;

        let handle = TempFileHandle {
            id: Uuid::new_v4(),
            path: path.clone(),
            owner: ctx.operation_id(),
        };
        self.temp_files.insert(
            handle.id,
            TempEntry {
                path,
                owner: ctx.operation_id(),
            },
        );
        ctx.log_operation(
            SecurityEventType::TempFileCreated,
            json!({"path": handle.path.display().to_string()}),
        );
        Ok(handle)
    }

    /// Create a per-invocation scratch directory. The caller owns removal
    /// (the executor guards it on every exit path).
    pub fn create_scratch_dir(&self, ctx: &SecurityContext) -> Result<PathBuf, EngineError> {
        let scratch_root = self.settings.read().scratch_root.clone();
        let dir = tempfile::Builder::new()
            .prefix("exec-")
            .tempdir_in(&scratch_root)
            .map_err(|e| EngineError::Internal(format!("scratch dir creation failed: {}", e)))?;
        let path = dir.keep();
        debug!(operation_id = %ctx.operation_id(), path = %path.display(), "scratch dir created");
        Ok(path)
    }

    /// Release a temp-file handle: remove the file and deregister it.
    pub fn release(&self, handle: TempFileHandle) {
        self.temp_files.remove(&handle.id);
        if let Err(e) = std::fs::remove_file(&handle.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %handle.path.display(), error = %e, "temp file removal failed");
            }
        }
        self.sink.record(SecurityEvent::new(
            SecurityEventType::TempFileReleased,
            handle.owner,
            None,
            json!({"path": handle.path.display().to_string()}),
        ));
    }

    /// Release every handle owned by `operation` (called when its context
    /// ends).
    pub fn sweep_context(&self, operation: OperationId) {
        let stale: Vec<Uuid> = self
            .temp_files
            .iter()
            .filter(|entry| entry.value().owner == operation)
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            if let Some((_, entry)) = self.temp_files.remove(&id) {
                if let Err(e) = std::fs::remove_file(&entry.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %entry.path.display(), error = %e, "temp sweep removal failed");
                    }
                }
                self.sink.record(SecurityEvent::new(
                    SecurityEventType::TempFileReleased,
                    entry.owner,
                    None,
                    json!({"path": entry.path.display().to_string(), "swept": true}),
                ));
            }
        }
    }

    /// Best-effort reclamation of handles whose owning operation is no
    /// longer live.
    pub fn sweep_expired(&self, live: &HashSet<OperationId>) {
        let expired: Vec<OperationId> = self
            .temp_files
            .iter()
            .map(|entry| entry.value().owner)
            .filter(|owner| !live.contains(owner))
            .collect();
        for owner in expired {
            self.sweep_context(owner);
        }
    }

    /// Number of live temp-file handles (observability / tests).
    pub fn open_temp_files(&self) -> usize {
        self.temp_files.len()
    }
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// non-existing remainder.
fn resolve_existing_prefix(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        return path.canonicalize();
    }
    let mut missing = Vec::new();
    let mut cursor = path;
    loop {
        match cursor.parent() {
            Some(parent) => {
                if let Some(name) = cursor.file_name() {
                    missing.push(name.to_os_string());
                }
                if parent.exists() {
                    let mut resolved = parent.canonicalize()?;
                    for part in missing.iter().rev() {
                        resolved.push(part);
                    }
                    return Ok(resolved);
                }
                cursor = parent;
            }
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no existing ancestor",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::SecurityEvent;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NullSink {
        events: Mutex<Vec<SecurityEvent>>,
    }

    impl EventSink for NullSink {
        fn record(&self, event: SecurityEvent) {
            self.events.lock().push(event);
        }
    }

    fn validator() -> (FileAccessValidator, Arc<NullSink>, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(NullSink::default());
        let settings = FileAccessSettings {
            workspace_root: root.path().join("workspace"),
            scratch_root: root.path().join("scratch"),
            allowed_file_types: vec![".txt".to_string(), ".json".to_string()],
            blocked_file_types: vec![".exe".to_string()],
            max_file_size: 1024,
        };
        let validator = FileAccessValidator::new(settings, sink.clone()).unwrap();
        (validator, sink, root)
    }

    fn ctx(sink: Arc<NullSink>) -> SecurityContext {
        SecurityContext::new(Some("tester".to_string()), sink)
    }

    #[test]
    fn test_relative_path_resolves_into_workspace() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let resolved = validator
            .validate_access("notes.txt", FileOperation::Write, &ctx)
            .unwrap();
        assert!(resolved.ends_with("workspace/notes.txt"));
    }

    #[test]
    fn test_outside_root_denied_with_single_violation_event() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let result = validator.validate_access("/etc/passwd", FileOperation::Read, &ctx);
        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));

        let violations: Vec<_> = ctx
            .events()
            .into_iter()
            .filter(|e| e.event_type == SecurityEventType::SecurityViolation)
            .collect();
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_traversal_denied() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let result = validator.validate_access("../outside.txt", FileOperation::Read, &ctx);
        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
    }

    #[test]
    fn test_blocked_extension_denied_on_write() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let result = validator.validate_access("payload.exe", FileOperation::Write, &ctx);
        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
    }

    #[test]
    fn test_extension_outside_allow_list_denied() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let result = validator.validate_access("data.bin", FileOperation::Write, &ctx);
        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
    }

    #[test]
    fn test_oversized_file_denied_on_read() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let path = {
            let resolved = validator
                .validate_access("big.txt", FileOperation::Write, &ctx)
                .unwrap();
            std::fs::write(&resolved, vec![0u8; 2048]).unwrap();
            resolved
        };
        let result =
            validator.validate_access(path.to_str().unwrap(), FileOperation::Read, &ctx);
        assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
    }

    #[test]
    fn test_temp_file_lifecycle() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let handle = validator
            .create_scoped_temp_file("secure_", ".txt", &ctx)
            .unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(validator.open_temp_files(), 1);

        validator.release(handle);
        assert!(!path.exists());
        assert_eq!(validator.open_temp_files(), 0);
    }

    #[test]
    fn test_sweep_reclaims_expired_context_files() {
        let (validator, sink, _root) = validator();
        let ctx = ctx(sink);
        let handle = validator
            .create_scoped_temp_file("secure_", ".txt", &ctx)
            .unwrap();
        let path = handle.path().to_path_buf();
        drop(handle);

        // The owning context is no longer live.
        validator.sweep_expired(&HashSet::new());
        assert!(!path.exists());
        assert_eq!(validator.open_temp_files(), 0);
    }

    #[test]
    fn test_symlink_escape_denied() {
        let (validator, sink, root) = validator();
        let ctx = ctx(sink);

        let outside = root.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        let workspace = root.path().join("workspace");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&outside, workspace.join("escape")).unwrap();
            let result =
                validator.validate_access("escape/secret.txt", FileOperation::Read, &ctx);
            assert!(matches!(result, Err(EngineError::SecurityViolation(_))));
        }
    }
}
