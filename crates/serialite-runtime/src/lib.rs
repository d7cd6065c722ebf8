// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialized asynchronous access to a single-threaded database engine.
//!
//! [`Connection`], [`Statement`] and [`Backup`] live on one owning thread.
//! Their calls are queued, ordered by an exclusive-lock discipline and run on
//! a blocking worker pool; outcomes come back to the owning thread through
//! per-call [`Reply`] continuations. Hook events and streamed rows produced on
//! worker threads reach the owning thread through a [`Mailbox`].

pub mod backup;
pub mod connection;
mod dispatch;
mod emitter;
pub mod mailbox;
mod queue;
pub mod relay;
pub mod reply;
pub mod runtime;
mod scheduler;
pub mod statement;

pub use backup::{Backup, BackupOptions, DEFAULT_RETRY_ERRORS};
pub use connection::{ConfigOption, Connection, DEFAULT_BUSY_TIMEOUT};
pub use mailbox::{Mailbox, MailboxSender};
pub use relay::{RowItem, RowRelay};
pub use reply::{Pending, Reply};
pub use runtime::{OwnerRuntime, RuntimeOptions};
pub use scheduler::Lifecycle;
pub use statement::Statement;
