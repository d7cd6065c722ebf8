// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resource-level notifications.

use std::time::Duration;

use crate::error::SerialiteError;
use crate::types::Change;

/// An event emitted by a connection, statement or backup on its owning thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection finished opening.
    Open,
    /// The connection closed.
    Close,
    /// An error that had no continuation to receive it.
    Error(SerialiteError),
    /// SQL text about to run (trace hook).
    Trace(String),
    /// SQL text that finished running and how long it took (profile hook).
    Profile { sql: String, elapsed: Duration },
    /// A row was inserted, updated or deleted (change hook).
    Change(Change),
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(self, Event::Error(_))
    }
}
