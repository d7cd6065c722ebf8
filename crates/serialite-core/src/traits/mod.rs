// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seam between the scheduling layer and the embedded engine.

pub mod engine;

pub use engine::{
    BackupHandle, DbHandle, Engine, ProfileHook, StmtHandle, TraceHook, UpdateHook,
};
