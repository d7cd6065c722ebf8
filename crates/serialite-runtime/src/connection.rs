// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The owner resource: one open database handle and its call queue.
//!
//! A [`Connection`] lives on the owning thread. Every engine call it makes
//! runs on the worker pool through [`dispatch::submit`], and every outcome is
//! applied back on the owning thread before the continuation fires.
//!
//! Non-exclusive calls run side by side, but their continuations fire in the
//! order the calls started. Settings apply one at a time in that same order.
//!
//! Statements and backups created from a connection are children. Their
//! initialization is queued on the connection like any other call, their
//! later operations count toward the connection's in-flight total, and they
//! start nothing while the connection holds its exclusive lock.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use serialite_core::{
    Change, ChangeKind, DbHandle, Engine, EngineResult, Event, ExecutionMode, Limit, OpenFlags,
    Params, Result, Row, RunResult, SerialiteError,
};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::backup::{Backup, BackupOptions};
use crate::dispatch;
use crate::emitter::Emitter;
use crate::mailbox::{Mailbox, MailboxSender};
use crate::queue::{Baton, Call, Job};
use crate::reply::{self, Pending, Reply};
use crate::scheduler::{self, Lifecycle, PurgeMode, Resource, Scheduler};
use crate::statement::Statement;

/// Busy timeout installed on every freshly opened handle.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// A non-exclusive connection setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOption {
    /// Emit [`Event::Trace`] for every statement the engine runs.
    Trace(bool),
    /// Emit [`Event::Profile`] with each statement's elapsed time.
    Profile(bool),
    /// Emit [`Event::Change`] for every row written.
    Change(bool),
    BusyTimeout(Duration),
    Limit { limit: Limit, value: i32 },
}

impl ConfigOption {
    /// The hook this option toggles, and whether it turns it on.
    fn hook(self) -> Option<(HookKind, bool)> {
        match self {
            ConfigOption::Trace(on) => Some((HookKind::Trace, on)),
            ConfigOption::Profile(on) => Some((HookKind::Profile, on)),
            ConfigOption::Change(on) => Some((HookKind::Change, on)),
            ConfigOption::BusyTimeout(_) | ConfigOption::Limit { .. } => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ConfigOption::Trace(_) => HookKind::Trace.label(),
            ConfigOption::Profile(_) => HookKind::Profile.label(),
            ConfigOption::Change(_) => HookKind::Change.label(),
            ConfigOption::BusyTimeout(_) => "busy_timeout",
            ConfigOption::Limit { .. } => "limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
    Trace,
    Profile,
    Change,
}

impl HookKind {
    fn label(self) -> &'static str {
        match self {
            HookKind::Trace => "trace_hook",
            HookKind::Profile => "profile_hook",
            HookKind::Change => "update_hook",
        }
    }
}

/// Which engine hooks are installed.
#[derive(Debug, Default, Clone, Copy)]
struct HookSet {
    trace: bool,
    profile: bool,
    change: bool,
}

impl HookSet {
    fn any(self) -> bool {
        self.trace || self.profile || self.change
    }

    fn set(&mut self, kind: HookKind, on: bool) {
        match kind {
            HookKind::Trace => self.trace = on,
            HookKind::Profile => self.profile = on,
            HookKind::Change => self.change = on,
        }
    }

    /// Clear every installed hook. Runs on a worker.
    fn uninstall(self, db: &dyn DbHandle) -> EngineResult<()> {
        if self.trace {
            db.set_trace_hook(None)?;
        }
        if self.profile {
            db.set_profile_hook(None)?;
        }
        if self.change {
            db.set_update_hook(None)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Hooks {
    installed: HookSet,
    /// Carries hook events from worker threads. Present while any hook is on.
    mailbox: Option<Rc<Mailbox<Event>>>,
}

fn install_hook(
    db: &dyn DbHandle,
    kind: HookKind,
    sink: Option<MailboxSender<Event>>,
) -> EngineResult<()> {
    match (kind, sink) {
        (HookKind::Trace, Some(tx)) => db.set_trace_hook(Some(Box::new(move |sql: &str| {
            tx.push(Event::Trace(sql.to_owned()));
        }))),
        (HookKind::Trace, None) => db.set_trace_hook(None),
        (HookKind::Profile, Some(tx)) => {
            db.set_profile_hook(Some(Box::new(move |sql: &str, elapsed: Duration| {
                tx.push(Event::Profile {
                    sql: sql.to_owned(),
                    elapsed,
                });
            })))
        }
        (HookKind::Profile, None) => db.set_profile_hook(None),
        (HookKind::Change, Some(tx)) => db.set_update_hook(Some(Box::new(
            move |kind: ChangeKind, database: &str, table: &str, rowid: i64| {
                tx.push(Event::Change(Change {
                    kind,
                    database: database.to_owned(),
                    table: table.to_owned(),
                    rowid,
                }));
            },
        ))),
        (HookKind::Change, None) => db.set_update_hook(None),
    }
}

/// Apply one setting. Runs on a worker.
fn apply_option(
    db: &dyn DbHandle,
    option: ConfigOption,
    sink: Option<MailboxSender<Event>>,
) -> EngineResult<()> {
    match option {
        ConfigOption::Trace(_) => install_hook(db, HookKind::Trace, sink),
        ConfigOption::Profile(_) => install_hook(db, HookKind::Profile, sink),
        ConfigOption::Change(_) => install_hook(db, HookKind::Change, sink),
        ConfigOption::BusyTimeout(timeout) => db.busy_timeout(timeout),
        ConfigOption::Limit { limit, value } => db.set_limit(limit, value).map(|previous| {
            debug!(?limit, previous, value, "limit changed");
        }),
    }
}

type Deferred = Box<dyn FnOnce()>;

/// Continuations of started calls, released in start order.
#[derive(Default)]
struct Completions {
    issued: u64,
    delivered: u64,
    finished: BTreeMap<u64, Deferred>,
}

/// Settings waiting for the one on the worker to return.
#[derive(Default)]
struct SettingChain {
    busy: bool,
    waiting: VecDeque<Deferred>,
}

/// A resource whose initialization is queued on a connection.
pub(crate) trait Child: 'static {
    /// Dispatch initialization against the connection's handle.
    fn begin_init(self: Rc<Self>, owner: &Rc<ConnInner>, reply: Reply<()>);

    /// The connection refused the initialization call.
    fn abort_init(self: Rc<Self>, err: SerialiteError, reply: Reply<()>);

    /// Run queued calls held back while the connection was locked.
    fn resume(self: Rc<Self>);
}

struct InitJob<C> {
    child: Rc<C>,
    reply: Reply<()>,
}

impl<C: Child> Job<ConnInner> for InitJob<C> {
    fn start(self: Box<Self>, owner: &Rc<ConnInner>) {
        let InitJob { child, reply } = *self;
        child.begin_init(owner, reply);
    }

    fn reject(self: Box<Self>, err: SerialiteError) -> Option<SerialiteError> {
        let InitJob { child, reply } = *self;
        // The child's own emitter reports an unheard failure.
        child.abort_init(err, reply);
        None
    }
}

pub(crate) struct ConnInner {
    path: String,
    handle: RefCell<Option<Arc<dyn DbHandle>>>,
    pub(crate) sched: RefCell<Scheduler<ConnInner>>,
    pub(crate) events: Emitter,
    close_requested: Cell<bool>,
    hooks: RefCell<Hooks>,
    deferred: RefCell<Vec<Weak<dyn Child>>>,
    completions: RefCell<Completions>,
    settings: RefCell<SettingChain>,
}

impl ConnInner {
    fn new(path: String) -> Self {
        Self {
            path,
            handle: RefCell::new(None),
            sched: RefCell::new(Scheduler::new(PurgeMode::Reject)),
            events: Emitter::new("connection"),
            close_requested: Cell::new(false),
            hooks: RefCell::new(Hooks::default()),
            deferred: RefCell::new(Vec::new()),
            completions: RefCell::new(Completions::default()),
            settings: RefCell::new(SettingChain::default()),
        }
    }

    fn handle(&self) -> Option<Arc<dyn DbHandle>> {
        self.handle.borrow().clone()
    }

    /// The handle a started call runs against.
    ///
    /// A started call implies a ready connection, which always has a handle.
    /// Should that ever fail, the lock the call took is dropped so the queue
    /// keeps moving.
    pub(crate) fn ready_handle(&self) -> Result<Arc<dyn DbHandle>> {
        let handle = self.handle();
        debug_assert!(handle.is_some(), "started call found no open handle");
        handle.ok_or_else(|| {
            let mut sched = self.sched.borrow_mut();
            if sched.pending() == 0 {
                sched.release();
            }
            self.closed_error()
        })
    }

    /// Whether `close` has been called and not refused.
    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.get()
    }

    pub(crate) fn enqueue_init<C: Child>(self: &Rc<Self>, child: Rc<C>, reply: Reply<()>) {
        let call = Call::from_job(false, Box::new(InitJob { child, reply }));
        scheduler::schedule(self, call);
    }

    /// Remember a child to resume once the lock drops.
    pub(crate) fn defer(&self, child: Weak<dyn Child>) {
        self.deferred.borrow_mut().push(child);
    }

    /// Run `work` on a worker and `after` on the owning thread once every
    /// call started earlier has had its own continuation run.
    ///
    /// Call right after taking the in-flight count for the call.
    pub(crate) fn dispatch_ordered<T, W, A>(self: &Rc<Self>, label: &'static str, work: W, after: A)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        A: FnOnce(T) + 'static,
    {
        let ticket = self.issue_ticket();
        let conn = Rc::clone(self);
        dispatch::submit(label, work, move |out| {
            conn.complete_in_order(ticket, Box::new(move || after(out)));
        });
    }

    fn issue_ticket(&self) -> u64 {
        let mut completions = self.completions.borrow_mut();
        let ticket = completions.issued;
        completions.issued += 1;
        ticket
    }

    /// Park `done` until every earlier ticket has run, then run whatever is
    /// next in line.
    fn complete_in_order(&self, ticket: u64, done: Deferred) {
        self.completions.borrow_mut().finished.insert(ticket, done);
        loop {
            let next = {
                let mut completions = self.completions.borrow_mut();
                let due = completions.delivered;
                let next = completions.finished.remove(&due);
                if next.is_some() {
                    completions.delivered += 1;
                } else if !completions.finished.is_empty() {
                    trace!(
                        due,
                        parked = completions.finished.len(),
                        "completion waiting on an earlier call"
                    );
                }
                next
            };
            match next {
                Some(done) => done(),
                None => break,
            }
        }
    }

    /// Deliver buffered hook events so they precede the next continuation.
    pub(crate) fn flush_events(&self) {
        let mailbox = self.hooks.borrow().mailbox.clone();
        if let Some(mailbox) = mailbox {
            mailbox.drain();
        }
    }

    fn hook_sink(self: &Rc<Self>) -> MailboxSender<Event> {
        let mut hooks = self.hooks.borrow_mut();
        let mailbox = hooks.mailbox.get_or_insert_with(|| {
            let conn = Rc::downgrade(self);
            Rc::new(Mailbox::new(move |event: Event| {
                if let Some(conn) = conn.upgrade() {
                    conn.events.emit(event);
                }
            }))
        });
        mailbox.sender()
    }

    /// Close the hook mailbox once no hook needs it.
    fn retire_idle_mailbox(&self) {
        let idle = {
            let mut hooks = self.hooks.borrow_mut();
            if hooks.installed.any() {
                None
            } else {
                hooks.mailbox.take()
            }
        };
        if let Some(mailbox) = idle {
            mailbox.close();
        }
    }

    /// Forget every hook and flush the mailbox. Returns what was installed.
    fn take_hooks(&self) -> HookSet {
        let (installed, mailbox) = {
            let mut hooks = self.hooks.borrow_mut();
            (std::mem::take(&mut hooks.installed), hooks.mailbox.take())
        };
        if let Some(mailbox) = mailbox {
            mailbox.close();
        }
        installed
    }

    fn after_open(self: &Rc<Self>, opened: EngineResult<Arc<dyn DbHandle>>, reply: Reply<()>) {
        self.sched.borrow_mut().end();
        match opened {
            Ok(handle) => {
                debug!(path = %self.path, "connection open");
                *self.handle.borrow_mut() = Some(handle);
                self.sched.borrow_mut().mark_ready();
                self.events.deliver(reply, Ok(()));
                self.events.emit(Event::Open);
            }
            Err(err) => {
                debug!(path = %self.path, error = %err, "open failed");
                self.sched.borrow_mut().mark_terminal();
                self.events.deliver(reply, Err(err.into()));
            }
        }
        scheduler::process(self);
    }

    /// Schedule one engine call against the handle.
    fn call_handle<T, W>(self: &Rc<Self>, label: &'static str, exclusive: bool, reply: Reply<T>, work: W)
    where
        T: Send + 'static,
        W: FnOnce(&dyn DbHandle) -> EngineResult<T> + Send + 'static,
    {
        let call = Call::new(exclusive, work, reply, move |conn: &Rc<ConnInner>, baton: Baton<W, T>| {
            conn.start_on_worker(label, baton);
        });
        scheduler::schedule(self, call);
    }

    fn start_on_worker<T, W>(self: &Rc<Self>, label: &'static str, baton: Baton<W, T>)
    where
        T: Send + 'static,
        W: FnOnce(&dyn DbHandle) -> EngineResult<T> + Send + 'static,
    {
        let Baton { params: work, reply } = baton;
        let handle = match self.ready_handle() {
            Ok(handle) => handle,
            Err(err) => return self.events.deliver(reply, Err(err)),
        };
        self.sched.borrow_mut().begin();
        let conn = Rc::clone(self);
        self.dispatch_ordered(
            label,
            move || work(handle.as_ref()),
            move |result: EngineResult<T>| {
                conn.sched.borrow_mut().end();
                conn.flush_events();
                conn.events.deliver(reply, result.map_err(SerialiteError::from));
                scheduler::process(&conn);
            },
        );
    }

    fn begin_close(self: &Rc<Self>, reply: Reply<()>) {
        let handle = match self.ready_handle() {
            Ok(handle) => handle,
            Err(err) => return self.events.deliver(reply, Err(err)),
        };
        let hooks = self.take_hooks();
        {
            let mut sched = self.sched.borrow_mut();
            sched.mark_closing();
            sched.begin();
        }
        debug!(path = %self.path, "closing connection");
        let conn = Rc::clone(self);
        dispatch::submit(
            "close",
            move || -> EngineResult<()> {
                hooks.uninstall(handle.as_ref())?;
                handle.close()
            },
            move |closed| conn.after_close(closed, reply),
        );
    }

    fn after_close(self: &Rc<Self>, closed: EngineResult<()>, reply: Reply<()>) {
        self.sched.borrow_mut().end();
        match closed {
            Ok(()) => {
                debug!(path = %self.path, "connection closed");
                self.handle.borrow_mut().take();
                self.sched.borrow_mut().mark_terminal();
                self.events.deliver(reply, Ok(()));
                self.events.emit(Event::Close);
            }
            Err(err) => {
                debug!(path = %self.path, error = %err, "close refused");
                self.sched.borrow_mut().revert_ready();
                self.close_requested.set(false);
                self.events.deliver(reply, Err(err.into()));
            }
        }
        scheduler::process(self);
    }

    fn configure(self: &Rc<Self>, option: ConfigOption, reply: Reply<()>) {
        let call = Call::new(
            false,
            option,
            reply,
            |conn: &Rc<ConnInner>, baton: Baton<ConfigOption, ()>| conn.begin_setting(baton),
        );
        scheduler::schedule(self, call);
    }

    /// Admit a setting. Its place in the completion order is fixed here, and
    /// it reaches a worker once every earlier setting has returned.
    fn begin_setting(self: &Rc<Self>, baton: Baton<ConfigOption, ()>) {
        let Baton {
            params: option,
            reply,
        } = baton;
        let handle = match self.ready_handle() {
            Ok(handle) => handle,
            Err(err) => return self.events.deliver(reply, Err(err)),
        };
        self.sched.borrow_mut().begin();
        let ticket = self.issue_ticket();
        let conn = Rc::clone(self);
        self.chain_setting(Box::new(move || {
            conn.apply_setting(handle, option, ticket, reply);
        }));
    }

    fn chain_setting(&self, start: Deferred) {
        {
            let mut chain = self.settings.borrow_mut();
            if chain.busy {
                chain.waiting.push_back(start);
                return;
            }
            chain.busy = true;
        }
        start();
    }

    fn advance_settings(&self) {
        let next = {
            let mut chain = self.settings.borrow_mut();
            let next = chain.waiting.pop_front();
            chain.busy = next.is_some();
            next
        };
        if let Some(start) = next {
            start();
        }
    }

    fn apply_setting(
        self: &Rc<Self>,
        handle: Arc<dyn DbHandle>,
        option: ConfigOption,
        ticket: u64,
        reply: Reply<()>,
    ) {
        let hook = option.hook();
        let sink = match hook {
            Some((_, true)) => Some(self.hook_sink()),
            _ => None,
        };
        let conn = Rc::clone(self);
        dispatch::submit(
            option.label(),
            move || apply_option(handle.as_ref(), option, sink),
            move |applied: EngineResult<()>| {
                if let Some((kind, on)) = hook.filter(|_| applied.is_ok()) {
                    conn.hooks.borrow_mut().installed.set(kind, on);
                }
                conn.retire_idle_mailbox();
                conn.advance_settings();
                let settled = Rc::clone(&conn);
                conn.complete_in_order(
                    ticket,
                    Box::new(move || {
                        settled.sched.borrow_mut().end();
                        settled.flush_events();
                        settled
                            .events
                            .deliver(reply, applied.map_err(SerialiteError::from));
                        scheduler::process(&settled);
                    }),
                );
            },
        );
    }
}

impl Resource for ConnInner {
    fn scheduler(&self) -> &RefCell<Scheduler<Self>> {
        &self.sched
    }

    fn emitter(&self) -> &Emitter {
        &self.events
    }

    fn closed_error(&self) -> SerialiteError {
        SerialiteError::misuse("Database is closed")
    }

    fn settled(self: &Rc<Self>) {
        if self.sched.borrow().is_locked() {
            return;
        }
        let deferred = std::mem::take(&mut *self.deferred.borrow_mut());
        for child in deferred.iter().filter_map(Weak::upgrade) {
            child.resume();
        }
    }
}

/// Shared body of a child's owner-barrier check.
pub(crate) fn defer_if_held<C: Child + Resource>(child: &Rc<C>, owner: &ConnInner) {
    if child.held() && child.scheduler().borrow().has_queued() {
        let weak: Weak<C> = Rc::downgrade(child);
        owner.defer(weak);
    }
}

/// A database connection bound to the owning thread.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnInner>,
}

impl Connection {
    /// Open `path` with `flags`. The connection is usable at once; calls made
    /// before the open completes are queued behind it.
    pub fn open(
        engine: Arc<dyn Engine>,
        path: impl Into<String>,
        flags: OpenFlags,
    ) -> (Self, Pending<()>) {
        let (reply, opened) = Reply::channel();
        (Self::open_with(engine, path, flags, reply), opened)
    }

    pub fn open_with(
        engine: Arc<dyn Engine>,
        path: impl Into<String>,
        flags: OpenFlags,
        reply: Reply<()>,
    ) -> Self {
        let inner = Rc::new(ConnInner::new(path.into()));
        inner.sched.borrow_mut().begin();
        let path = inner.path.clone();
        let conn = Rc::clone(&inner);
        dispatch::submit(
            "open",
            move || -> EngineResult<Arc<dyn DbHandle>> {
                let handle = engine.open(&path, flags)?;
                handle.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
                Ok(handle)
            },
            move |opened| conn.after_open(opened, reply),
        );
        Self { inner }
    }

    pub fn close(&self) -> Pending<()> {
        reply::pending(|reply| self.close_with(reply))
    }

    /// Close once everything queued ahead has finished. Hooks are removed
    /// first. The engine refuses while statements or backups are still live,
    /// in which case the connection stays open.
    pub fn close_with(&self, reply: Reply<()>) {
        self.inner.close_requested.set(true);
        let call = Call::new(
            true,
            (),
            reply,
            |conn: &Rc<ConnInner>, baton: Baton<(), ()>| conn.begin_close(baton.reply),
        );
        scheduler::schedule(&self.inner, call);
    }

    pub fn exec(&self, sql: impl Into<String>) -> Pending<()> {
        reply::pending(|reply| self.exec_with(sql, reply))
    }

    /// Run one or more statements with no parameters and no result rows.
    pub fn exec_with(&self, sql: impl Into<String>, reply: Reply<()>) {
        let sql = sql.into();
        self.inner
            .call_handle("exec", true, reply, move |db| db.exec(&sql));
    }

    pub fn wait(&self) -> Pending<()> {
        reply::pending(|reply| self.wait_with(reply))
    }

    /// Resolve once every call scheduled before this one has completed.
    pub fn wait_with(&self, reply: Reply<()>) {
        let call = Call::new(
            true,
            (),
            reply,
            |conn: &Rc<ConnInner>, baton: Baton<(), ()>| {
                conn.sched.borrow_mut().release();
                conn.events.deliver(baton.reply, Ok(()));
                scheduler::process(conn);
            },
        );
        scheduler::schedule(&self.inner, call);
    }

    pub fn load_extension(&self, path: impl Into<String>) -> Pending<()> {
        reply::pending(|reply| self.load_extension_with(path, reply))
    }

    pub fn load_extension_with(&self, path: impl Into<String>, reply: Reply<()>) {
        let path = path.into();
        self.inner
            .call_handle("load_extension", true, reply, move |db| {
                db.load_extension(&path)
            });
    }

    pub fn configure(&self, option: ConfigOption) -> Pending<()> {
        reply::pending(|reply| self.configure_with(option, reply))
    }

    /// Apply a setting. Settings never take the exclusive lock, but apply one
    /// at a time in the order they were scheduled.
    pub fn configure_with(&self, option: ConfigOption, reply: Reply<()>) {
        self.inner.configure(option, reply);
    }

    /// Ask the engine to abandon whatever it is running. Synchronous.
    pub fn interrupt(&self) -> Result<()> {
        match self.lifecycle() {
            Lifecycle::Ready => {}
            Lifecycle::Closing => return Err(SerialiteError::misuse("Database is closing")),
            Lifecycle::Constructing | Lifecycle::Terminal => {
                return Err(SerialiteError::misuse("Database is not open"));
            }
        }
        match self.inner.handle() {
            Some(handle) => {
                handle.interrupt();
                Ok(())
            }
            None => Err(SerialiteError::misuse("Database is not open")),
        }
    }

    pub fn set_mode(&self, mode: ExecutionMode) {
        self.inner
            .sched
            .borrow_mut()
            .set_serialize(mode == ExecutionMode::Serialize);
        scheduler::process(&self.inner);
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.inner.sched.borrow().serializes() {
            ExecutionMode::Serialize
        } else {
            ExecutionMode::Parallel
        }
    }

    /// Schedule everything `f` submits in serialize mode, then restore the
    /// previous mode.
    pub fn serialize<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        self.scoped_mode(true, f)
    }

    /// Schedule everything `f` submits in parallel mode, then restore the
    /// previous mode.
    pub fn parallelize<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        self.scoped_mode(false, f)
    }

    fn scoped_mode<T>(&self, serialize: bool, f: impl FnOnce(&Connection) -> T) -> T {
        let before = self.inner.sched.borrow_mut().set_serialize(serialize);
        let out = f(self);
        self.inner.sched.borrow_mut().set_serialize(before);
        scheduler::process(&self.inner);
        out
    }

    /// Compile `sql`. The statement is usable at once; its calls wait for
    /// the prepare.
    pub fn prepare(&self, sql: impl Into<String>) -> (Statement, Pending<()>) {
        let (reply, prepared) = Reply::channel();
        (self.prepare_with(sql, reply), prepared)
    }

    pub fn prepare_with(&self, sql: impl Into<String>, reply: Reply<()>) -> Statement {
        Statement::create(&self.inner, sql.into(), reply)
    }

    pub fn run(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<RunResult> {
        reply::pending(|reply| self.run_with(sql, params, reply))
    }

    /// Prepare, run once and finalize.
    pub fn run_with(&self, sql: impl Into<String>, params: impl Into<Params>, reply: Reply<RunResult>) {
        let params = params.into();
        self.one_shot(sql.into(), reply, move |stmt, reply| stmt.run_with(params, reply));
    }

    pub fn get(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<Option<Row>> {
        reply::pending(|reply| self.get_with(sql, params, reply))
    }

    pub fn get_with(
        &self,
        sql: impl Into<String>,
        params: impl Into<Params>,
        reply: Reply<Option<Row>>,
    ) {
        let params = params.into();
        self.one_shot(sql.into(), reply, move |stmt, reply| stmt.get_with(params, reply));
    }

    pub fn all(&self, sql: impl Into<String>, params: impl Into<Params>) -> Pending<Vec<Row>> {
        reply::pending(|reply| self.all_with(sql, params, reply))
    }

    pub fn all_with(
        &self,
        sql: impl Into<String>,
        params: impl Into<Params>,
        reply: Reply<Vec<Row>>,
    ) {
        let params = params.into();
        self.one_shot(sql.into(), reply, move |stmt, reply| stmt.all_with(params, reply));
    }

    pub fn each(
        &self,
        sql: impl Into<String>,
        params: impl Into<Params>,
        on_row: impl FnMut(Row) + 'static,
    ) -> Pending<usize> {
        reply::pending(|reply| self.each_with(sql, params, on_row, reply))
    }

    pub fn each_with(
        &self,
        sql: impl Into<String>,
        params: impl Into<Params>,
        on_row: impl FnMut(Row) + 'static,
        reply: Reply<usize>,
    ) {
        let params = params.into();
        self.one_shot(sql.into(), reply, move |stmt, reply| {
            stmt.each_with(params, on_row, reply);
        });
    }

    /// Prepare `sql`, run `op` on the statement, then finalize it. The caller
    /// hears exactly once: the prepare error, or the operation's outcome.
    fn one_shot<T: 'static>(
        &self,
        sql: String,
        reply: Reply<T>,
        op: impl FnOnce(&Statement, Reply<T>),
    ) {
        let slot = Rc::new(RefCell::new(Some(reply)));
        let on_prepared = {
            let slot = Rc::clone(&slot);
            let conn = Rc::clone(&self.inner);
            Reply::callback(move |prepared: Result<()>| {
                if let Err(err) = prepared {
                    let reply = slot.borrow_mut().take();
                    if let Some(reply) = reply {
                        conn.events.deliver(reply, Err(err));
                    }
                }
            })
        };
        let stmt = self.prepare_with(sql, on_prepared);
        let conn = Rc::clone(&self.inner);
        op(
            &stmt,
            Reply::callback(move |result: Result<T>| {
                let reply = slot.borrow_mut().take();
                if let Some(reply) = reply {
                    conn.events.deliver(reply, result);
                }
            }),
        );
        stmt.finalize_with(Reply::none());
    }

    pub fn backup(&self, options: BackupOptions) -> (Backup, Pending<()>) {
        let (reply, ready) = Reply::channel();
        (self.backup_with(options, reply), ready)
    }

    /// Start an online backup between this connection and a file.
    pub fn backup_with(&self, options: BackupOptions, reply: Reply<()>) -> Backup {
        Backup::create(&self.inner, options, reply)
    }

    /// Receive this connection's events from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    /// From a successful open until the close completes.
    pub fn is_open(&self) -> bool {
        matches!(self.lifecycle(), Lifecycle::Ready | Lifecycle::Closing)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.sched.borrow().is_idle()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.sched.borrow().lifecycle()
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.inner.path)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnInner {
    fn drop(&mut self) {
        if self.handle.get_mut().is_some() {
            warn!(path = %self.path, "connection dropped while open; handle closes on release");
        }
    }
}
