// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Online backups between a connection and a database file.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serialite_core::{
    BackupDirection, BackupHandle, BackupStep, EngineResult, Event, SerialiteError, Status,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{self, Child, ConnInner};
use crate::dispatch;
use crate::emitter::Emitter;
use crate::queue::{Baton, Call};
use crate::reply::{self, Pending, Reply};
use crate::scheduler::{self, Lifecycle, PurgeMode, Resource, Scheduler};

/// Step errors that leave a backup usable unless configured otherwise.
pub const DEFAULT_RETRY_ERRORS: [Status; 2] = [Status::BUSY, Status::LOCKED];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    pub filename: String,
    /// Schema name on the source side.
    pub source_name: String,
    /// Schema name on the destination side.
    pub dest_name: String,
    pub direction: BackupDirection,
    /// Step errors that are reported but do not end the backup.
    pub retry_errors: Vec<Status>,
}

impl BackupOptions {
    /// Copy the connection's `main` database into `filename`.
    pub fn to_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source_name: "main".into(),
            dest_name: "main".into(),
            direction: BackupDirection::ToFile,
            retry_errors: DEFAULT_RETRY_ERRORS.to_vec(),
        }
    }

    /// Copy `filename` into the connection's `main` database.
    pub fn from_file(filename: impl Into<String>) -> Self {
        Self {
            direction: BackupDirection::FromFile,
            ..Self::to_file(filename)
        }
    }

    pub fn with_retry_errors(mut self, retry_errors: Vec<Status>) -> Self {
        self.retry_errors = retry_errors;
        self
    }
}

/// An error status outside the retry set ends the backup.
fn is_fatal(status: Status, retry_errors: &[Status]) -> bool {
    status.is_error()
        && !retry_errors
            .iter()
            .any(|retry| retry.primary() == status.primary())
}

pub(crate) struct BackupInner {
    owner: Rc<ConnInner>,
    options: BackupOptions,
    handle: RefCell<Option<Box<dyn BackupHandle>>>,
    sched: RefCell<Scheduler<BackupInner>>,
    events: Emitter,
    completed: Cell<bool>,
    failed: Cell<bool>,
    remaining: Cell<i32>,
    page_count: Cell<i32>,
    retry_errors: RefCell<Vec<Status>>,
}

impl BackupInner {
    fn after_init(self: Rc<Self>, started: EngineResult<Box<dyn BackupHandle>>, reply: Reply<()>) {
        let owner = Rc::clone(&self.owner);
        owner.sched.borrow_mut().end();
        match started {
            Ok(handle) if owner.close_requested() => {
                debug!(filename = %self.options.filename, "connection closing; finishing new backup");
                owner.sched.borrow_mut().begin();
                let finisher = Rc::clone(&owner);
                dispatch::submit(
                    "backup_finish",
                    move || handle.finish(),
                    move |()| {
                        finisher.sched.borrow_mut().end();
                        scheduler::process(&finisher);
                    },
                );
                self.failed.set(true);
                self.sched.borrow_mut().mark_terminal();
                self.events
                    .deliver(reply, Err(SerialiteError::misuse("Database is closing")));
            }
            Ok(handle) => {
                *self.handle.borrow_mut() = Some(handle);
                self.sched.borrow_mut().mark_ready();
                self.events.deliver(reply, Ok(()));
            }
            Err(err) => {
                debug!(filename = %self.options.filename, error = %err, "backup init failed");
                self.failed.set(true);
                self.sched.borrow_mut().mark_terminal();
                self.events.deliver(reply, Err(err.into()));
            }
        }
        scheduler::process(&self);
        scheduler::process(&owner);
    }

    fn begin_step(self: &Rc<Self>, baton: Baton<(i32, Vec<Status>), bool>) {
        let Baton {
            params: (pages, retry_errors),
            reply,
        } = baton;
        let taken = self.handle.borrow_mut().take();
        debug_assert!(taken.is_some(), "backup step started without a handle");
        let Some(mut handle) = taken else {
            self.sched.borrow_mut().release();
            return self.events.deliver(reply, Err(self.closed_error()));
        };
        self.sched.borrow_mut().begin();
        self.owner.sched.borrow_mut().begin();
        let backup = Rc::clone(self);
        dispatch::submit(
            "backup_step",
            move || {
                let step = handle.step(pages);
                if is_fatal(step.status, &retry_errors) {
                    handle.finish();
                    (None, step)
                } else {
                    (Some(handle), step)
                }
            },
            move |(handle, step)| backup.after_step(handle, step, reply),
        );
    }

    fn after_step(
        self: Rc<Self>,
        handle: Option<Box<dyn BackupHandle>>,
        step: BackupStep,
        reply: Reply<bool>,
    ) {
        let usable = handle.is_some();
        *self.handle.borrow_mut() = handle;
        self.remaining.set(step.remaining);
        self.page_count.set(step.page_count);
        self.sched.borrow_mut().end();
        self.owner.sched.borrow_mut().end();

        let result = match step.status {
            Status::DONE => {
                self.completed.set(true);
                Ok(true)
            }
            Status::OK => Ok(false),
            status => {
                if !usable {
                    debug!(filename = %self.options.filename, %status, "backup failed");
                    self.failed.set(true);
                    self.sched.borrow_mut().mark_terminal();
                }
                Err(SerialiteError::Engine {
                    status,
                    message: status.describe().to_owned(),
                })
            }
        };
        self.owner.flush_events();
        self.events.deliver(reply, result);
        scheduler::process(&self);
        scheduler::process(&self.owner);
    }

    fn begin_finish(self: &Rc<Self>, reply: Reply<()>) {
        let taken = self.handle.borrow_mut().take();
        let Some(handle) = taken else {
            self.sched.borrow_mut().release();
            return self.events.deliver(reply, Err(self.closed_error()));
        };
        {
            let mut sched = self.sched.borrow_mut();
            sched.mark_closing();
            sched.begin();
        }
        self.owner.sched.borrow_mut().begin();
        let backup = Rc::clone(self);
        dispatch::submit(
            "backup_finish",
            move || handle.finish(),
            move |()| {
                {
                    let mut sched = backup.sched.borrow_mut();
                    sched.end();
                    sched.mark_terminal();
                }
                backup.owner.sched.borrow_mut().end();
                if !backup.completed.get() {
                    backup.failed.set(true);
                }
                debug!(
                    filename = %backup.options.filename,
                    completed = backup.completed.get(),
                    "backup finished"
                );
                backup.events.deliver(reply, Ok(()));
                scheduler::process(&backup);
                scheduler::process(&backup.owner);
            },
        );
    }
}

impl Child for BackupInner {
    fn begin_init(self: Rc<Self>, owner: &Rc<ConnInner>, reply: Reply<()>) {
        let handle = match owner.ready_handle() {
            Ok(handle) => handle,
            Err(err) => return self.abort_init(err, reply),
        };
        owner.sched.borrow_mut().begin();
        let options = self.options.clone();
        owner.dispatch_ordered(
            "backup_init",
            move || {
                handle.backup(
                    &options.filename,
                    &options.source_name,
                    &options.dest_name,
                    options.direction,
                )
            },
            move |started| self.after_init(started, reply),
        );
    }

    fn abort_init(self: Rc<Self>, err: SerialiteError, reply: Reply<()>) {
        self.failed.set(true);
        self.sched.borrow_mut().mark_terminal();
        self.events.deliver(reply, Err(err));
        scheduler::process(&self);
    }

    fn resume(self: Rc<Self>) {
        scheduler::process(&self);
    }
}

impl Resource for BackupInner {
    fn scheduler(&self) -> &RefCell<Scheduler<Self>> {
        &self.sched
    }

    fn emitter(&self) -> &Emitter {
        &self.events
    }

    fn closed_error(&self) -> SerialiteError {
        SerialiteError::misuse("Backup is already finished")
    }

    fn held(&self) -> bool {
        self.owner.sched.borrow().is_locked()
    }

    fn settled(self: &Rc<Self>) {
        connection::defer_if_held(self, &self.owner);
    }
}

/// An online backup created by [`Connection::backup`](crate::Connection::backup).
///
/// `remaining` and `page_count` are `-1` until the first step reports.
#[derive(Clone)]
pub struct Backup {
    inner: Rc<BackupInner>,
}

impl Backup {
    pub(crate) fn create(owner: &Rc<ConnInner>, options: BackupOptions, reply: Reply<()>) -> Self {
        let retry_errors = options.retry_errors.clone();
        let inner = Rc::new(BackupInner {
            owner: Rc::clone(owner),
            options,
            handle: RefCell::new(None),
            sched: RefCell::new(Scheduler::new(PurgeMode::Release)),
            events: Emitter::new("backup"),
            completed: Cell::new(false),
            failed: Cell::new(false),
            remaining: Cell::new(-1),
            page_count: Cell::new(-1),
            retry_errors: RefCell::new(retry_errors),
        });
        owner.enqueue_init(Rc::clone(&inner), reply);
        Self { inner }
    }

    pub fn step(&self, pages: i32) -> Pending<bool> {
        reply::pending(|reply| self.step_with(pages, reply))
    }

    /// Copy up to `pages` pages (all of them when negative). Resolves to
    /// `true` once the copy is complete.
    ///
    /// Errors in the retry set, as it stands when this call is made, are
    /// reported and the backup stays usable. Any other error finishes it.
    pub fn step_with(&self, pages: i32, reply: Reply<bool>) {
        let retry_errors = self.inner.retry_errors.borrow().clone();
        let call = Call::new(
            true,
            (pages, retry_errors),
            reply,
            |backup: &Rc<BackupInner>, baton: Baton<(i32, Vec<Status>), bool>| {
                backup.begin_step(baton);
            },
        );
        scheduler::schedule(&self.inner, call);
    }

    pub fn finish(&self) -> Pending<()> {
        reply::pending(|reply| self.finish_with(reply))
    }

    /// Release the engine backup. A backup finished before completing is
    /// marked failed.
    pub fn finish_with(&self, reply: Reply<()>) {
        let call = Call::new(
            true,
            (),
            reply,
            |backup: &Rc<BackupInner>, baton: Baton<(), ()>| backup.begin_finish(baton.reply),
        );
        scheduler::schedule(&self.inner, call);
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn options(&self) -> &BackupOptions {
        &self.inner.options
    }

    pub fn is_idle(&self) -> bool {
        self.inner.sched.borrow().is_idle()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.get()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.get()
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminal
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.sched.borrow().lifecycle()
    }

    /// Pages left to copy as of the last step.
    pub fn remaining(&self) -> i32 {
        self.inner.remaining.get()
    }

    /// Source page count as of the last step.
    pub fn page_count(&self) -> i32 {
        self.inner.page_count.get()
    }

    pub fn retry_errors(&self) -> Vec<Status> {
        self.inner.retry_errors.borrow().clone()
    }

    /// Affects steps scheduled from now on.
    pub fn set_retry_errors(&self, retry_errors: Vec<Status>) {
        *self.inner.retry_errors.borrow_mut() = retry_errors;
    }
}

impl fmt::Debug for Backup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backup")
            .field("filename", &self.inner.options.filename)
            .field("lifecycle", &self.lifecycle())
            .field("completed", &self.is_completed())
            .field("failed", &self.is_failed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_copy_main_to_file() {
        let opts = BackupOptions::to_file("/tmp/out.db");
        assert_eq!(opts.source_name, "main");
        assert_eq!(opts.dest_name, "main");
        assert_eq!(opts.direction, BackupDirection::ToFile);
        assert_eq!(opts.retry_errors, vec![Status::BUSY, Status::LOCKED]);
        assert_eq!(
            BackupOptions::from_file("/tmp/in.db").direction,
            BackupDirection::FromFile
        );
    }

    #[test]
    fn only_errors_outside_the_retry_set_are_fatal() {
        let retry = DEFAULT_RETRY_ERRORS;
        assert!(!is_fatal(Status::OK, &retry));
        assert!(!is_fatal(Status::DONE, &retry));
        assert!(!is_fatal(Status::BUSY, &retry));
        assert!(!is_fatal(Status(Status::LOCKED.0 | (1 << 8)), &retry));
        assert!(is_fatal(Status::IOERR, &retry));
        assert!(is_fatal(Status::BUSY, &[]));
    }
}
