// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engine error taxonomy.
//!
//! Validators and the executor never swallow a denial: every denial becomes
//! both a returned error and a logged event. A limit breach travels with the
//! partial [`ExecutionResult`](crate::domain::sandbox::ExecutionResult) so
//! callers can decide whether partial output is usable. Failures inside a
//! sandboxed unit surface as a non-zero exit status in the result, never as
//! an `EngineError`; only engine-level faults are `Internal`.

use thiserror::Error;

use crate::domain::sandbox::ExecutionResult;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input or tool configuration. Caught at the boundary that
    /// produced it, never propagated past registration or parameter parsing.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A validator denied the operation. Recoverable; always logged.
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// A running execution was forcibly terminated. The partial result is
    /// returned alongside the error.
    #[error("Resource limit exceeded: {breach}")]
    ResourceLimitExceeded {
        breach: String,
        result: Box<ExecutionResult>,
    },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool is disabled: {0}")]
    ToolDisabled(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// Malformed configuration document or limit override.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Engine-level fault (monitor failure, registry corruption). Fatal:
    /// propagated to the process-level error handler, never silently
    /// absorbed.
    #[error("Internal engine fault: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::SecurityViolation("path outside root".to_string());
        assert!(err.to_string().contains("path outside root"));

        let err = EngineError::ToolNotFound("missing".to_string());
        assert!(err.to_string().contains("missing"));

        let err = EngineError::DuplicateTool("echo".to_string());
        assert!(err.to_string().contains("echo"));
    }
}
