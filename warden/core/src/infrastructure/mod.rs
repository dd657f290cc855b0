// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod file_access;
pub mod monitor;
pub mod network_access;
pub mod process_runtime;

pub use audit::{AuditLog, AuditStats};
pub use file_access::{FileAccessSettings, FileAccessValidator, FileOperation, TempFileHandle};
pub use monitor::{LimitBreach, MonitorReport, ResourceMonitor};
pub use network_access::{NetworkAccessSettings, NetworkAccessValidator};
pub use process_runtime::ProcessRuntime;
