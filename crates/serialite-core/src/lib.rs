// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Serialite.
//!
//! This crate provides the error type, engine status codes, value types and
//! the engine trait seam used throughout the Serialite workspace. Engine
//! backends implement the traits defined here; the runtime schedules calls
//! against them.

pub mod error;
pub mod events;
pub mod status;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{EngineError, EngineResult, Result, SerialiteError};
pub use events::Event;
pub use status::Status;
pub use traits::{BackupHandle, DbHandle, Engine, ProfileHook, StmtHandle, TraceHook, UpdateHook};
pub use types::{
    BackupDirection, BackupStep, Change, ChangeKind, ExecutionMode, Limit, OpenFlags, Params, Row,
    RunResult, Step, Value,
};
