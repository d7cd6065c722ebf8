// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database handles over a shared `rusqlite::Connection`.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::hooks::Action;
use rusqlite::{InterruptHandle, LoadExtensionGuard, ffi};
use serialite_core::{
    BackupDirection, BackupHandle, ChangeKind, DbHandle, Engine, EngineError, EngineResult, Limit,
    OpenFlags, ProfileHook, StmtHandle, Status, TraceHook, UpdateHook,
};
use tracing::debug;

use crate::backup::SqliteBackup;
use crate::error::{closed, engine_error};
use crate::statement::SqliteStmt;

/// Opens databases with the bundled SQLite library.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for SqliteEngine {
    fn open(&self, path: &str, flags: OpenFlags) -> EngineResult<Arc<dyn DbHandle>> {
        let conn = rusqlite::Connection::open_with_flags(
            Path::new(path),
            rusqlite::OpenFlags::from_bits_truncate(flags.bits() as i32),
        )
        .map_err(engine_error)?;
        debug!(path, flags = flags.bits(), "opened sqlite database");
        Ok(Arc::new(SqliteDb::new(conn)))
    }
}

#[derive(Default)]
struct HookSlots {
    trace: Option<TraceHook>,
    profile: Option<ProfileHook>,
}

/// State shared by a database handle and every statement and backup made
/// from it. `conn` is `None` once the connection has been closed.
pub(crate) struct DbShared {
    conn: Mutex<Option<rusqlite::Connection>>,
    hooks: Mutex<HookSlots>,
    live: AtomicUsize,
}

impl DbShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<rusqlite::Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` on the open connection, firing the trace and profile hooks
    /// around it.
    pub(crate) fn traced<T>(
        &self,
        conn: &rusqlite::Connection,
        sql: &str,
        f: impl FnOnce(&rusqlite::Connection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let hooks = self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(trace) = &hooks.trace {
            trace(sql);
        }
        let started = Instant::now();
        let result = f(conn);
        if let Some(profile) = &hooks.profile {
            profile(sql, started.elapsed());
        }
        result
    }

    pub(crate) fn acquire(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An open SQLite connection.
pub struct SqliteDb {
    shared: Arc<DbShared>,
    interrupt: InterruptHandle,
}

impl SqliteDb {
    fn new(conn: rusqlite::Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            shared: Arc::new(DbShared {
                conn: Mutex::new(Some(conn)),
                hooks: Mutex::new(HookSlots::default()),
                live: AtomicUsize::new(0),
            }),
            interrupt,
        }
    }

    /// Statements and backups that still reference this connection.
    pub fn live_children(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> EngineResult<T>) -> EngineResult<T> {
        let guard = self.shared.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        f(conn)
    }
}

impl DbHandle for SqliteDb {
    fn close(&self) -> EngineResult<()> {
        if self.live_children() > 0 {
            return Err(EngineError::new(
                Status::BUSY,
                "unable to close due to unfinalized statements or unfinished backups",
            ));
        }
        let mut guard = self.shared.lock();
        match guard.take() {
            Some(conn) => match conn.close() {
                Ok(()) => Ok(()),
                Err((conn, err)) => {
                    *guard = Some(conn);
                    Err(engine_error(err))
                }
            },
            None => Ok(()),
        }
    }

    fn exec(&self, sql: &str) -> EngineResult<()> {
        self.with_conn(|conn| {
            self.shared
                .traced(conn, sql, |conn| conn.execute_batch(sql).map_err(engine_error))
        })
    }

    fn prepare(&self, sql: &str) -> EngineResult<Box<dyn StmtHandle>> {
        // Compile once up front so syntax errors surface here; later steps
        // reuse the cached statement.
        self.with_conn(|conn| conn.prepare_cached(sql).map(drop).map_err(engine_error))?;
        Ok(Box::new(SqliteStmt::new(Arc::clone(&self.shared), sql)))
    }

    fn busy_timeout(&self, timeout: Duration) -> EngineResult<()> {
        self.with_conn(|conn| conn.busy_timeout(timeout).map_err(engine_error))
    }

    fn set_limit(&self, limit: Limit, value: i32) -> EngineResult<i32> {
        self.with_conn(|conn| {
            // SAFETY: the handle belongs to an open connection and the mutex
            // keeps every other thread off it for the duration of the call.
            let previous = unsafe { ffi::sqlite3_limit(conn.handle(), limit.id(), value) };
            Ok(previous)
        })
    }

    fn load_extension(&self, path: &str) -> EngineResult<()> {
        self.with_conn(|conn| {
            // SAFETY: loading an extension runs native code from `path`; the
            // caller names the library explicitly.
            unsafe {
                let _guard = LoadExtensionGuard::new(conn).map_err(engine_error)?;
                conn.load_extension(path, None::<&str>).map_err(engine_error)
            }
        })
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    fn set_trace_hook(&self, hook: Option<TraceHook>) -> EngineResult<()> {
        let mut hooks = self.shared.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        hooks.trace = hook;
        Ok(())
    }

    fn set_profile_hook(&self, hook: Option<ProfileHook>) -> EngineResult<()> {
        let mut hooks = self.shared.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        hooks.profile = hook;
        Ok(())
    }

    fn set_update_hook(&self, hook: Option<UpdateHook>) -> EngineResult<()> {
        self.with_conn(|conn| {
            let registered = match hook {
                Some(hook) => conn.update_hook(Some(
                    move |action: Action, database: &str, table: &str, rowid: i64| {
                        hook(change_kind(action), database, table, rowid)
                    },
                )),
                None => conn.update_hook(None::<fn(Action, &str, &str, i64)>),
            };
            registered.into_engine_result()
        })
    }

    fn backup(
        &self,
        filename: &str,
        source_name: &str,
        dest_name: &str,
        direction: BackupDirection,
    ) -> EngineResult<Box<dyn BackupHandle>> {
        let backup = SqliteBackup::init(
            Arc::clone(&self.shared),
            filename,
            source_name,
            dest_name,
            direction,
        )?;
        Ok(Box::new(backup))
    }
}

/// The outcome of registering a connection hook with rusqlite.
trait HookRegistration {
    fn into_engine_result(self) -> EngineResult<()>;
}

impl HookRegistration for () {
    fn into_engine_result(self) -> EngineResult<()> {
        Ok(())
    }
}

impl HookRegistration for rusqlite::Result<()> {
    fn into_engine_result(self) -> EngineResult<()> {
        self.map_err(engine_error)
    }
}

fn change_kind(action: Action) -> ChangeKind {
    match action {
        Action::SQLITE_INSERT => ChangeKind::Insert,
        Action::SQLITE_UPDATE => ChangeKind::Update,
        Action::SQLITE_DELETE => ChangeKind::Delete,
        _ => ChangeKind::Unknown,
    }
}
