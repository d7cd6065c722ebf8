// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The embedded engine as seen by the scheduler.
//!
//! Every method here is a blocking call and is only ever invoked from a
//! worker thread. The runtime guarantees that a statement or backup handle is
//! used by one thread at a time; a [`DbHandle`] may be shared by several
//! non-exclusive operations running in parallel mode, so implementations must
//! serialize access internally the way the engine's own full-mutex mode does.

use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineResult;
use crate::types::{
    BackupDirection, BackupStep, ChangeKind, Limit, OpenFlags, Params, RunResult, Step,
};

/// Fired with the SQL text of each statement as it starts running.
pub type TraceHook = Box<dyn Fn(&str) + Send + Sync>;

/// Fired with the SQL text and elapsed time of each finished statement.
pub type ProfileHook = Box<dyn Fn(&str, Duration) + Send + Sync>;

/// Fired with (kind, database, table, rowid) for every changed row.
pub type UpdateHook = Box<dyn Fn(ChangeKind, &str, &str, i64) + Send + Sync>;

/// Factory for database handles.
pub trait Engine: Send + Sync {
    /// Opens (or creates) the database at `path`.
    fn open(&self, path: &str, flags: OpenFlags) -> EngineResult<Arc<dyn DbHandle>>;
}

/// An open database connection.
pub trait DbHandle: Send + Sync {
    /// Closes the connection. Fails with `BUSY` while statements or backups
    /// created from it are still alive; the handle stays usable in that case.
    fn close(&self) -> EngineResult<()>;

    /// Runs one or more `;`-separated statements, discarding any rows.
    fn exec(&self, sql: &str) -> EngineResult<()>;

    /// Compiles a single statement.
    fn prepare(&self, sql: &str) -> EngineResult<Box<dyn StmtHandle>>;

    fn busy_timeout(&self, timeout: Duration) -> EngineResult<()>;

    /// Sets a run-time limit and returns its previous value.
    fn set_limit(&self, limit: Limit, value: i32) -> EngineResult<i32>;

    fn load_extension(&self, path: &str) -> EngineResult<()>;

    /// Requests that the running operation stop at its next opportunity.
    /// Must not block; may be called from any thread.
    fn interrupt(&self);

    fn set_trace_hook(&self, hook: Option<TraceHook>) -> EngineResult<()>;

    fn set_profile_hook(&self, hook: Option<ProfileHook>) -> EngineResult<()>;

    fn set_update_hook(&self, hook: Option<UpdateHook>) -> EngineResult<()>;

    /// Starts an online backup between this connection and the file at
    /// `filename`.
    fn backup(
        &self,
        filename: &str,
        source_name: &str,
        dest_name: &str,
        direction: BackupDirection,
    ) -> EngineResult<Box<dyn BackupHandle>>;
}

/// A compiled statement.
pub trait StmtHandle: Send {
    /// Resets the statement, clears previous bindings and binds `params`.
    fn bind(&mut self, params: &Params) -> EngineResult<()>;

    fn step(&mut self) -> EngineResult<Step>;

    /// Rewinds the statement, keeping its bindings.
    fn reset(&mut self);

    /// Insert id and change count of the connection after the last step.
    fn run_info(&self) -> RunResult;

    fn finalize(self: Box<Self>);
}

/// An in-progress online backup.
pub trait BackupHandle: Send {
    /// Copies up to `pages` pages (negative copies everything).
    fn step(&mut self, pages: i32) -> BackupStep;

    fn finish(self: Box<Self>);
}
