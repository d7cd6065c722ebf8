// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite engine for Serialite.
//!
//! Implements the `serialite-core` engine traits on top of `rusqlite` with
//! the bundled SQLite library. Hand [`SqliteEngine`] to
//! `serialite_runtime::Connection::open` to run real databases.

mod backup;
mod db;
mod error;
mod statement;

pub use db::{SqliteDb, SqliteEngine};
