// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Online backups through the raw `sqlite3_backup_*` interface.
//!
//! `rusqlite::backup::Backup` borrows both connections, which cannot outlive
//! a single worker call. This handle owns the file side and shares the
//! connection side instead.

use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::Arc;

use rusqlite::ffi;
use serialite_core::{BackupDirection, BackupHandle, BackupStep, EngineError, EngineResult, Status};
use tracing::debug;

use crate::db::DbShared;
use crate::error::{closed, engine_error, last_error};

pub(crate) struct SqliteBackup {
    raw: NonNull<ffi::sqlite3_backup>,
    shared: Arc<DbShared>,
    // Dropped after `raw` is finished.
    _file: rusqlite::Connection,
}

// SAFETY: a backup object may move between threads as long as only one
// thread uses it at a time, which `&mut self` on every call guarantees. Both
// connections it touches are only used under the shared connection mutex.
unsafe impl Send for SqliteBackup {}

impl SqliteBackup {
    pub(crate) fn init(
        shared: Arc<DbShared>,
        filename: &str,
        source_name: &str,
        dest_name: &str,
        direction: BackupDirection,
    ) -> EngineResult<Self> {
        let source_name = schema_name(source_name)?;
        let dest_name = schema_name(dest_name)?;
        let file = rusqlite::Connection::open(filename).map_err(engine_error)?;

        let raw = {
            let guard = shared.lock();
            let conn = guard.as_ref().ok_or_else(closed)?;
            // SAFETY: both handles are open connections kept alive by `file`
            // and `shared`; the mutex keeps other threads off `conn`.
            unsafe {
                let (source, dest) = match direction {
                    BackupDirection::ToFile => (conn.handle(), file.handle()),
                    BackupDirection::FromFile => (file.handle(), conn.handle()),
                };
                let raw = ffi::sqlite3_backup_init(dest, dest_name.as_ptr(), source, source_name.as_ptr());
                NonNull::new(raw).ok_or_else(|| last_error(dest))?
            }
        };
        debug!(filename, ?direction, "backup initialized");
        shared.acquire();
        Ok(Self {
            raw,
            shared,
            _file: file,
        })
    }
}

impl BackupHandle for SqliteBackup {
    fn step(&mut self, pages: i32) -> BackupStep {
        let _guard = self.shared.lock();
        // SAFETY: `raw` stays valid until `finish`, which consumes the handle.
        unsafe {
            let status = ffi::sqlite3_backup_step(self.raw.as_ptr(), pages);
            BackupStep {
                status: Status(status),
                remaining: ffi::sqlite3_backup_remaining(self.raw.as_ptr()),
                page_count: ffi::sqlite3_backup_pagecount(self.raw.as_ptr()),
            }
        }
    }

    fn finish(self: Box<Self>) {}
}

impl Drop for SqliteBackup {
    fn drop(&mut self) {
        {
            let _guard = self.shared.lock();
            // SAFETY: finishing releases `raw`; nothing uses it afterwards.
            unsafe {
                ffi::sqlite3_backup_finish(self.raw.as_ptr());
            }
        }
        self.shared.release();
    }
}

fn schema_name(name: &str) -> EngineResult<CString> {
    CString::new(name).map_err(|_| EngineError::new(Status::MISUSE, format!("invalid schema name: {name:?}")))
}
