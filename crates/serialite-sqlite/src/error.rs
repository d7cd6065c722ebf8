// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::ffi::CStr;

use rusqlite::ffi;
use serialite_core::{EngineError, Status};

/// Map a rusqlite failure onto the engine's status code and message.
pub(crate) fn engine_error(err: rusqlite::Error) -> EngineError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let status = Status(failure.extended_code);
            let message = message.unwrap_or_else(|| status.describe().to_string());
            EngineError::new(status, message)
        }
        rusqlite::Error::InvalidParameterName(name) => {
            EngineError::new(Status::RANGE, format!("no such parameter: {name}"))
        }
        other => EngineError::new(Status::ERROR, other.to_string()),
    }
}

/// The most recent error recorded on a raw connection.
///
/// # Safety
///
/// `db` must be a valid, open connection used by no other thread.
pub(crate) unsafe fn last_error(db: *mut ffi::sqlite3) -> EngineError {
    // SAFETY: guaranteed by the caller; errmsg is owned by the connection.
    let (code, message) = unsafe {
        let code = ffi::sqlite3_extended_errcode(db);
        let message = CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (code, message)
    };
    EngineError::new(Status(code), message)
}

pub(crate) fn closed() -> EngineError {
    EngineError::new(Status::MISUSE, "database is closed")
}
