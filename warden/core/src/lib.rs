// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Warden core.
//!
//! Security policy and sandboxed-execution engine: mediates code execution,
//! filesystem access and outbound network requests performed by registered
//! tools, enforces hard resource bounds, and records a queryable audit
//! trail.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
