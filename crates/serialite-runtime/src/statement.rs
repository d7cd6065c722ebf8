// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prepared statements.
//!
//! Every statement operation is exclusive on the statement: at most one is
//! in flight, and the engine handle moves to the worker for its duration.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serialite_core::{
    EngineResult, Event, Params, Result, Row, RunResult, SerialiteError, Step, StmtHandle,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::{self, Child, ConnInner};
use crate::dispatch;
use crate::emitter::Emitter;
use crate::mailbox::MailboxSender;
use crate::queue::{Baton, Call};
use crate::relay::{RowItem, RowRelay};
use crate::reply::{self, Pending, Reply};
use crate::scheduler::{self, Lifecycle, PurgeMode, Resource, Scheduler};

/// Rebind when parameters are given, otherwise rewind to the first row.
fn rebind(handle: &mut dyn StmtHandle, params: &Params) -> EngineResult<()> {
    if params.is_empty() {
        handle.reset();
        Ok(())
    } else {
        handle.bind(params)
    }
}

fn stream_rows(
    handle: &mut dyn StmtHandle,
    params: &Params,
    rows: &MailboxSender<RowItem>,
) -> EngineResult<()> {
    rebind(handle, params)?;
    loop {
        match handle.step()? {
            Step::Row(row) => {
                rows.push(RowItem::Row(row));
            }
            Step::Done => return Ok(()),
        }
    }
}

pub(crate) struct StmtInner {
    owner: Rc<ConnInner>,
    sql: String,
    handle: RefCell<Option<Box<dyn StmtHandle>>>,
    sched: RefCell<Scheduler<StmtInner>>,
    events: Emitter,
    /// The last step reported no more rows.
    done: Cell<bool>,
    last_run: Cell<RunResult>,
}

impl StmtInner {
    fn schedule<P: 'static, T: 'static>(
        self: &Rc<Self>,
        params: P,
        reply: Reply<T>,
        begin: impl FnOnce(&Rc<StmtInner>, Baton<P, T>) + 'static,
    ) {
        scheduler::schedule(self, Call::new(true, params, reply, begin));
    }

    /// Move the handle to a worker, run `work`, move it back and map the
    /// outcome with `finish` before ending the operation.
    fn run_op<S, T, W, F>(self: &Rc<Self>, label: &'static str, reply: Reply<T>, work: W, finish: F)
    where
        S: Send + 'static,
        T: 'static,
        W: FnOnce(&mut dyn StmtHandle) -> EngineResult<S> + Send + 'static,
        F: FnOnce(&StmtInner, EngineResult<S>) -> Result<T> + 'static,
    {
        let taken = self.handle.borrow_mut().take();
        debug_assert!(taken.is_some(), "statement operation started without a handle");
        let Some(mut handle) = taken else {
            self.sched.borrow_mut().release();
            return self.events.deliver(reply, Err(self.closed_error()));
        };
        self.sched.borrow_mut().begin();
        self.owner.sched.borrow_mut().begin();
        let stmt = Rc::clone(self);
        dispatch::submit(
            label,
            move || {
                let out = work(handle.as_mut());
                (handle, out)
            },
            move |(handle, out)| {
                *stmt.handle.borrow_mut() = Some(handle);
                let result = finish(&stmt, out);
                stmt.sched.borrow_mut().end();
                stmt.owner.sched.borrow_mut().end();
                stmt.owner.flush_events();
                stmt.events.deliver(reply, result);
                scheduler::process(&stmt);
                scheduler::process(&stmt.owner);
            },
        );
    }

    fn after_prepare(self: Rc<Self>, prepared: EngineResult<Box<dyn StmtHandle>>, reply: Reply<()>) {
        let owner = Rc::clone(&self.owner);
        owner.sched.borrow_mut().end();
        match prepared {
            Ok(handle) if owner.close_requested() => {
                debug!(sql = %self.sql, "connection closing; finalizing new statement");
                owner.sched.borrow_mut().begin();
                let finalizer = Rc::clone(&owner);
                dispatch::submit(
                    "finalize",
                    move || handle.finalize(),
                    move |()| {
                        finalizer.sched.borrow_mut().end();
                        scheduler::process(&finalizer);
                    },
                );
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
                debug!(sql = %self.sql, error = %err, "prepare failed");
                self.sched.borrow_mut().mark_terminal();
                self.events.deliver(reply, Err(err.into()));
            }
        }
        owner.flush_events();
        scheduler::process(&self);
        scheduler::process(&owner);
    }

    fn begin_finalize(self: &Rc<Self>, reply: Reply<()>) {
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
        let stmt = Rc::clone(self);
        dispatch::submit(
            "finalize",
            move || handle.finalize(),
            move |()| {
                {
                    let mut sched = stmt.sched.borrow_mut();
                    sched.end();
                    sched.mark_terminal();
                }
                stmt.owner.sched.borrow_mut().end();
                debug!(sql = %stmt.sql, "statement finalized");
                stmt.events.deliver(reply, Ok(()));
                scheduler::process(&stmt);
                scheduler::process(&stmt.owner);
            },
        );
    }
}

impl Child for StmtInner {
    fn begin_init(self: Rc<Self>, owner: &Rc<ConnInner>, reply: Reply<()>) {
        let handle = match owner.ready_handle() {
            Ok(handle) => handle,
            Err(err) => return self.abort_init(err, reply),
        };
        owner.sched.borrow_mut().begin();
        let sql = self.sql.clone();
        owner.dispatch_ordered(
            "prepare",
            move || handle.prepare(&sql),
            move |prepared| self.after_prepare(prepared, reply),
        );
    }

    fn abort_init(self: Rc<Self>, err: SerialiteError, reply: Reply<()>) {
        self.sched.borrow_mut().mark_terminal();
        self.events.deliver(reply, Err(err));
        scheduler::process(&self);
    }

    fn resume(self: Rc<Self>) {
        scheduler::process(&self);
    }
}

impl Resource for StmtInner {
    fn scheduler(&self) -> &RefCell<Scheduler<Self>> {
        &self.sched
    }

    fn emitter(&self) -> &Emitter {
        &self.events
    }

    fn closed_error(&self) -> SerialiteError {
        SerialiteError::misuse("Statement is already finalized")
    }

    fn held(&self) -> bool {
        self.owner.sched.borrow().is_locked()
    }

    fn settled(self: &Rc<Self>) {
        connection::defer_if_held(self, &self.owner);
    }
}

/// A compiled statement belonging to a [`Connection`](crate::Connection).
///
/// Calls are queued until the prepare completes and run one at a time in
/// submission order. Once finalized, later calls fail with
/// `Statement is already finalized`.
#[derive(Clone)]
pub struct Statement {
    inner: Rc<StmtInner>,
}

impl Statement {
    pub(crate) fn create(owner: &Rc<ConnInner>, sql: String, reply: Reply<()>) -> Self {
        let inner = Rc::new(StmtInner {
            owner: Rc::clone(owner),
            sql,
            handle: RefCell::new(None),
            sched: RefCell::new(Scheduler::new(PurgeMode::Release)),
            events: Emitter::new("statement"),
            done: Cell::new(false),
            last_run: Cell::new(RunResult::default()),
        });
        owner.enqueue_init(Rc::clone(&inner), reply);
        Self { inner }
    }

    pub fn bind(&self, params: impl Into<Params>) -> Pending<()> {
        reply::pending(|reply| self.bind_with(params, reply))
    }

    /// Replace the bound parameters and rewind.
    pub fn bind_with(&self, params: impl Into<Params>, reply: Reply<()>) {
        self.inner.schedule(
            params.into(),
            reply,
            |stmt: &Rc<StmtInner>, baton: Baton<Params, ()>| {
                let Baton { params, reply } = baton;
                stmt.run_op(
                    "bind",
                    reply,
                    move |handle| handle.bind(&params),
                    |stmt, bound| {
                        stmt.done.set(false);
                        bound.map_err(SerialiteError::from)
                    },
                );
            },
        );
    }

    pub fn get(&self, params: impl Into<Params>) -> Pending<Option<Row>> {
        reply::pending(|reply| self.get_with(params, reply))
    }

    /// Step once. After the statement reports no more rows, further calls
    /// without parameters return `None` without touching the engine.
    pub fn get_with(&self, params: impl Into<Params>, reply: Reply<Option<Row>>) {
        self.inner.schedule(
            params.into(),
            reply,
            |stmt: &Rc<StmtInner>, baton: Baton<Params, Option<Row>>| {
                let Baton { params, reply } = baton;
                let exhausted = stmt.done.get() && params.is_empty();
                stmt.run_op(
                    "get",
                    reply,
                    move |handle| {
                        if exhausted {
                            return Ok(Step::Done);
                        }
                        if !params.is_empty() {
                            handle.bind(&params)?;
                        }
                        handle.step()
                    },
                    |stmt, stepped| match stepped {
                        Ok(Step::Row(row)) => {
                            stmt.done.set(false);
                            Ok(Some(row))
                        }
                        Ok(Step::Done) => {
                            stmt.done.set(true);
                            Ok(None)
                        }
                        Err(err) => {
                            stmt.done.set(false);
                            Err(err.into())
                        }
                    },
                );
            },
        );
    }

    pub fn run(&self, params: impl Into<Params>) -> Pending<RunResult> {
        reply::pending(|reply| self.run_with(params, reply))
    }

    /// Step once from the first row, discarding any row produced.
    pub fn run_with(&self, params: impl Into<Params>, reply: Reply<RunResult>) {
        self.inner.schedule(
            params.into(),
            reply,
            |stmt: &Rc<StmtInner>, baton: Baton<Params, RunResult>| {
                let Baton { params, reply } = baton;
                stmt.run_op(
                    "run",
                    reply,
                    move |handle| {
                        rebind(handle, &params)?;
                        let step = handle.step()?;
                        Ok((step == Step::Done, handle.run_info()))
                    },
                    |stmt, ran| match ran {
                        Ok((done, info)) => {
                            stmt.done.set(done);
                            stmt.last_run.set(info);
                            Ok(info)
                        }
                        Err(err) => {
                            stmt.done.set(false);
                            Err(err.into())
                        }
                    },
                );
            },
        );
    }

    pub fn all(&self, params: impl Into<Params>) -> Pending<Vec<Row>> {
        reply::pending(|reply| self.all_with(params, reply))
    }

    /// Every row from the first.
    pub fn all_with(&self, params: impl Into<Params>, reply: Reply<Vec<Row>>) {
        self.inner.schedule(
            params.into(),
            reply,
            |stmt: &Rc<StmtInner>, baton: Baton<Params, Vec<Row>>| {
                let Baton { params, reply } = baton;
                stmt.run_op(
                    "all",
                    reply,
                    move |handle| {
                        rebind(handle, &params)?;
                        let mut rows = Vec::new();
                        while let Step::Row(row) = handle.step()? {
                            rows.push(row);
                        }
                        Ok(rows)
                    },
                    |stmt, rows| {
                        stmt.done.set(rows.is_ok());
                        rows.map_err(SerialiteError::from)
                    },
                );
            },
        );
    }

    pub fn each(
        &self,
        params: impl Into<Params>,
        on_row: impl FnMut(Row) + 'static,
    ) -> Pending<usize> {
        reply::pending(|reply| self.each_with(params, on_row, reply))
    }

    /// Stream every row to `on_row` as the worker produces it, then resolve
    /// `reply` with the number of rows delivered. Rows and the completion all
    /// arrive before the statement's next operation starts.
    pub fn each_with(
        &self,
        params: impl Into<Params>,
        on_row: impl FnMut(Row) + 'static,
        reply: Reply<usize>,
    ) {
        let on_row: Box<dyn FnMut(Row)> = Box::new(on_row);
        self.inner.schedule(
            (params.into(), on_row),
            reply,
            |stmt: &Rc<StmtInner>, baton: Baton<(Params, Box<dyn FnMut(Row)>), usize>| {
                let Baton {
                    params: (params, on_row),
                    reply,
                } = baton;
                let completion = Rc::clone(stmt);
                let relay = RowRelay::new(on_row, move |retrieved| {
                    completion.events.deliver(reply, retrieved);
                });
                let rows = relay.sender();
                let tail = relay.sender();
                stmt.run_op(
                    "each",
                    // Fires after the statement settles, so the caller sees
                    // every row and hook event ahead of the count.
                    Reply::callback(move |outcome: Result<()>| {
                        tail.push(RowItem::Done(outcome));
                        relay.close();
                    }),
                    move |handle| stream_rows(handle, &params, &rows),
                    |stmt, streamed| {
                        stmt.done.set(streamed.is_ok());
                        streamed.map_err(SerialiteError::from)
                    },
                );
            },
        );
    }

    pub fn reset(&self) -> Pending<()> {
        reply::pending(|reply| self.reset_with(reply))
    }

    /// Rewind to the first row, keeping bound parameters.
    pub fn reset_with(&self, reply: Reply<()>) {
        self.inner
            .schedule((), reply, |stmt: &Rc<StmtInner>, baton: Baton<(), ()>| {
                stmt.run_op(
                    "reset",
                    baton.reply,
                    |handle| {
                        handle.reset();
                        Ok(())
                    },
                    |stmt, reset: EngineResult<()>| {
                        stmt.done.set(false);
                        reset.map_err(SerialiteError::from)
                    },
                );
            });
    }

    pub fn finalize(&self) -> Pending<()> {
        reply::pending(|reply| self.finalize_with(reply))
    }

    /// Release the engine statement once queued calls ahead have run.
    pub fn finalize_with(&self, reply: Reply<()>) {
        self.inner
            .schedule((), reply, |stmt: &Rc<StmtInner>, baton: Baton<(), ()>| {
                stmt.begin_finalize(baton.reply);
            });
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// The prepare succeeded. Stays true after finalize.
    pub fn is_prepared(&self) -> bool {
        self.inner.sched.borrow().reached_ready()
    }

    pub fn is_finalized(&self) -> bool {
        self.lifecycle() == Lifecycle::Terminal
    }

    pub fn is_idle(&self) -> bool {
        self.inner.sched.borrow().is_idle()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.sched.borrow().lifecycle()
    }

    /// Outcome of the most recent successful `run`.
    pub fn last_run(&self) -> RunResult {
        self.inner.last_run.get()
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.inner.sql)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
