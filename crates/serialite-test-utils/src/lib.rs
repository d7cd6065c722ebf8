// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Serialite integration tests.
//!
//! Provides a scriptable engine and owning-thread harness helpers for fast,
//! deterministic, CI-runnable scheduling tests without a real database.
//!
//! # Components
//!
//! - [`MockEngine`] - In-memory engine with a call log, scripted rows and backup statuses
//! - [`Gate`] - Blocks worker threads at a named engine call until opened
//! - [`run_local`] / [`eventually`] - Owning-thread harness helpers

pub mod gate;
pub mod harness;
pub mod mock_engine;

pub use gate::Gate;
pub use harness::{eventually, row, run_local};
pub use mock_engine::{MOCK_BACKUP_PAGES, MockEngine};
