// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod engine;
pub mod registry;
pub mod sandbox_executor;

pub use engine::SecurityEngine;
pub use registry::{ToolHandler, ToolRegistry};
pub use sandbox_executor::{ExecutionOutcome, SandboxExecutor};
