// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine result codes.
//!
//! The scheduling layer treats codes as opaque integers. Only `OK`, `ROW` and
//! `DONE` drive control flow; `BUSY` and `LOCKED` are the default retryable set
//! for backups.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A primary result code as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const ERROR: Status = Status(1);
    pub const INTERNAL: Status = Status(2);
    pub const PERM: Status = Status(3);
    pub const ABORT: Status = Status(4);
    pub const BUSY: Status = Status(5);
    pub const LOCKED: Status = Status(6);
    pub const NOMEM: Status = Status(7);
    pub const READONLY: Status = Status(8);
    pub const INTERRUPT: Status = Status(9);
    pub const IOERR: Status = Status(10);
    pub const CORRUPT: Status = Status(11);
    pub const NOTFOUND: Status = Status(12);
    pub const FULL: Status = Status(13);
    pub const CANTOPEN: Status = Status(14);
    pub const PROTOCOL: Status = Status(15);
    pub const EMPTY: Status = Status(16);
    pub const SCHEMA: Status = Status(17);
    pub const TOOBIG: Status = Status(18);
    pub const CONSTRAINT: Status = Status(19);
    pub const MISMATCH: Status = Status(20);
    pub const MISUSE: Status = Status(21);
    pub const NOLFS: Status = Status(22);
    pub const AUTH: Status = Status(23);
    pub const FORMAT: Status = Status(24);
    pub const RANGE: Status = Status(25);
    pub const NOTADB: Status = Status(26);
    pub const NOTICE: Status = Status(27);
    pub const WARNING: Status = Status(28);
    pub const ROW: Status = Status(100);
    pub const DONE: Status = Status(101);

    const NAMES: &'static [(&'static str, Status)] = &[
        ("OK", Status::OK),
        ("ERROR", Status::ERROR),
        ("INTERNAL", Status::INTERNAL),
        ("PERM", Status::PERM),
        ("ABORT", Status::ABORT),
        ("BUSY", Status::BUSY),
        ("LOCKED", Status::LOCKED),
        ("NOMEM", Status::NOMEM),
        ("READONLY", Status::READONLY),
        ("INTERRUPT", Status::INTERRUPT),
        ("IOERR", Status::IOERR),
        ("CORRUPT", Status::CORRUPT),
        ("NOTFOUND", Status::NOTFOUND),
        ("FULL", Status::FULL),
        ("CANTOPEN", Status::CANTOPEN),
        ("PROTOCOL", Status::PROTOCOL),
        ("EMPTY", Status::EMPTY),
        ("SCHEMA", Status::SCHEMA),
        ("TOOBIG", Status::TOOBIG),
        ("CONSTRAINT", Status::CONSTRAINT),
        ("MISMATCH", Status::MISMATCH),
        ("MISUSE", Status::MISUSE),
        ("NOLFS", Status::NOLFS),
        ("AUTH", Status::AUTH),
        ("FORMAT", Status::FORMAT),
        ("RANGE", Status::RANGE),
        ("NOTADB", Status::NOTADB),
        ("NOTICE", Status::NOTICE),
        ("WARNING", Status::WARNING),
        ("ROW", Status::ROW),
        ("DONE", Status::DONE),
    ];

    /// The primary code with any extended bits stripped.
    pub fn primary(self) -> Status {
        Status(self.0 & 0xff)
    }

    /// Short name of the code (`"BUSY"`), if it is a known primary code.
    pub fn name(self) -> Option<&'static str> {
        let primary = self.primary();
        Self::NAMES
            .iter()
            .find(|(_, status)| *status == primary)
            .map(|(name, _)| *name)
    }

    /// Whether the code indicates an error rather than progress.
    pub fn is_error(self) -> bool {
        !matches!(self.primary(), Status::OK | Status::ROW | Status::DONE)
    }

    /// English description of the code, as the engine's `errstr` spells it.
    ///
    /// Used where a failure is not attached to a connection and therefore has
    /// no engine-supplied message (backup steps).
    pub fn describe(self) -> &'static str {
        match self.primary() {
            Status::OK => "not an error",
            Status::ERROR => "SQL logic error",
            Status::INTERNAL => "internal logic error",
            Status::PERM => "access permission denied",
            Status::ABORT => "query aborted",
            Status::BUSY => "database is locked",
            Status::LOCKED => "database table is locked",
            Status::NOMEM => "out of memory",
            Status::READONLY => "attempt to write a readonly database",
            Status::INTERRUPT => "interrupted",
            Status::IOERR => "disk I/O error",
            Status::CORRUPT => "database disk image is malformed",
            Status::NOTFOUND => "unknown operation",
            Status::FULL => "database or disk is full",
            Status::CANTOPEN => "unable to open database file",
            Status::PROTOCOL => "locking protocol",
            Status::SCHEMA => "database schema has changed",
            Status::TOOBIG => "string or blob too big",
            Status::CONSTRAINT => "constraint failed",
            Status::MISMATCH => "datatype mismatch",
            Status::MISUSE => "bad parameter or other API misuse",
            Status::NOLFS => "large file support is disabled",
            Status::AUTH => "authorization denied",
            Status::RANGE => "column index out of range",
            Status::NOTADB => "file is not a database",
            Status::ROW => "another row available",
            Status::DONE => "no more rows available",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "SQLITE_{name}"),
            None => write!(f, "SQLITE_CODE_{}", self.0),
        }
    }
}

/// Parses `"BUSY"`, `"SQLITE_BUSY"` (case-insensitive) or a bare integer.
impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return Ok(Status(code));
        }
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("SQLITE_").unwrap_or(&upper);
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == bare)
            .map(|(_, status)| *status)
            .ok_or_else(|| format!("unknown status code `{s}`"))
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}
