// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-resource call scheduling.
//!
//! [`Scheduler`] is the pure state machine: lifecycle, the exclusive lock
//! flag, the in-flight counter and the FIFO queue. It never runs anything
//! itself; [`schedule`] and [`process`] ask it for a decision, release the
//! borrow and only then start or purge calls, so continuations may schedule
//! more work without hitting a live `RefCell` borrow.
//!
//! Admission rule: a call is queued while the resource is not ready, while it
//! is locked or held by its owner, while older calls are still queued, or
//! when it is exclusive (or the resource serializes) and anything is in
//! flight. Otherwise it runs at once, and an exclusive call takes the lock.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serialite_core::{Event, SerialiteError};
use strum::Display;
use tracing::debug;

use crate::emitter::Emitter;
use crate::queue::Call;

/// Where a resource is in its life. Only moves forward, except that a
/// refused close returns a connection from `Closing` to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    /// Opening, preparing or initializing.
    Constructing,
    Ready,
    /// Close, finalize or finish is in flight.
    Closing,
    /// Closed, finalized or finished.
    Terminal,
}

/// How queued calls are disposed of once a resource is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PurgeMode {
    /// Every continuation receives the resource's closed error.
    Reject,
    /// Batons are dropped unfired.
    Release,
}

pub(crate) enum Admit<R> {
    Run(Call<R>),
    Queued,
    Purge(Vec<Call<R>>, PurgeMode),
}

pub(crate) enum Next<R> {
    Run(Call<R>),
    Purge(Vec<Call<R>>, PurgeMode),
    Idle,
}

pub(crate) struct Scheduler<R> {
    lifecycle: Lifecycle,
    locked: bool,
    pending: usize,
    serialize: bool,
    reached_ready: bool,
    unready_purge: PurgeMode,
    queue: VecDeque<Call<R>>,
}

impl<R> Scheduler<R> {
    /// `unready_purge` applies if the resource turns terminal without ever
    /// having been ready.
    pub(crate) fn new(unready_purge: PurgeMode) -> Self {
        Self {
            lifecycle: Lifecycle::Constructing,
            locked: false,
            pending: 0,
            serialize: false,
            reached_ready: false,
            unready_purge,
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    pub(crate) fn reached_ready(&self) -> bool {
        self.reached_ready
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Ready, unlocked and nothing queued.
    pub(crate) fn is_idle(&self) -> bool {
        self.lifecycle == Lifecycle::Ready && !self.locked && self.queue.is_empty()
    }

    pub(crate) fn serializes(&self) -> bool {
        self.serialize
    }

    /// Returns the previous setting.
    pub(crate) fn set_serialize(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.serialize, on)
    }

    fn purge_mode(&self) -> PurgeMode {
        if self.reached_ready {
            PurgeMode::Reject
        } else {
            self.unready_purge
        }
    }

    pub(crate) fn admit(&mut self, mut call: Call<R>, held: bool) -> Admit<R> {
        if self.lifecycle == Lifecycle::Terminal {
            let mut calls: Vec<Call<R>> = self.queue.drain(..).collect();
            calls.push(call);
            return Admit::Purge(calls, self.purge_mode());
        }

        call.exclusive |= self.serialize;
        if self.lifecycle != Lifecycle::Ready
            || held
            || self.locked
            || !self.queue.is_empty()
            || (call.exclusive && self.pending > 0)
        {
            self.queue.push_back(call);
            return Admit::Queued;
        }

        self.locked = call.exclusive;
        Admit::Run(call)
    }

    /// The next thing to do for this resource.
    pub(crate) fn poll(&mut self, held: bool) -> Next<R> {
        if self.lifecycle == Lifecycle::Terminal {
            if self.queue.is_empty() {
                return Next::Idle;
            }
            let calls = self.queue.drain(..).collect();
            return Next::Purge(calls, self.purge_mode());
        }
        if self.lifecycle != Lifecycle::Ready || held || self.locked {
            return Next::Idle;
        }
        match self.queue.front() {
            Some(front) if front.exclusive && self.pending > 0 => Next::Idle,
            Some(_) => match self.queue.pop_front() {
                Some(call) => {
                    self.locked = call.exclusive;
                    Next::Run(call)
                }
                None => Next::Idle,
            },
            None => Next::Idle,
        }
    }

    /// An operation touching the handle was dispatched.
    pub(crate) fn begin(&mut self) {
        self.pending += 1;
    }

    /// A dispatched operation came back. The lock drops once nothing is in
    /// flight.
    pub(crate) fn end(&mut self) {
        debug_assert!(self.pending > 0, "end without matching begin");
        self.pending = self.pending.saturating_sub(1);
        if self.pending == 0 {
            self.locked = false;
        }
    }

    /// Drop the lock taken by a call that completed without dispatching.
    pub(crate) fn release(&mut self) {
        debug_assert_eq!(self.pending, 0, "released while work is in flight");
        self.locked = false;
    }

    pub(crate) fn mark_ready(&mut self) {
        debug_assert_eq!(self.lifecycle, Lifecycle::Constructing);
        self.lifecycle = Lifecycle::Ready;
        self.reached_ready = true;
    }

    pub(crate) fn mark_closing(&mut self) {
        debug_assert_eq!(self.lifecycle, Lifecycle::Ready);
        self.lifecycle = Lifecycle::Closing;
    }

    /// A close the engine refused leaves the resource usable.
    pub(crate) fn revert_ready(&mut self) {
        debug_assert_eq!(self.lifecycle, Lifecycle::Closing);
        self.lifecycle = Lifecycle::Ready;
    }

    pub(crate) fn mark_terminal(&mut self) {
        self.lifecycle = Lifecycle::Terminal;
    }
}

/// A resource driven by a [`Scheduler`].
pub(crate) trait Resource: Sized + 'static {
    fn scheduler(&self) -> &RefCell<Scheduler<Self>>;

    fn emitter(&self) -> &Emitter;

    /// The error late calls receive once the resource is terminal.
    fn closed_error(&self) -> SerialiteError;

    /// Whether an owner currently forbids this resource from starting calls.
    fn held(&self) -> bool {
        false
    }

    /// Runs after every [`schedule`] and [`process`] pass.
    fn settled(self: &Rc<Self>) {}
}

/// Submit `call` to `resource`.
pub(crate) fn schedule<R: Resource>(resource: &Rc<R>, call: Call<R>) {
    let held = resource.held();
    let admit = resource.scheduler().borrow_mut().admit(call, held);
    match admit {
        Admit::Run(call) => call.start(resource),
        Admit::Queued => {}
        Admit::Purge(calls, mode) => purge(resource, calls, mode),
    }
    resource.settled();
}

/// Start or purge queued calls until the scheduler has nothing to offer.
pub(crate) fn process<R: Resource>(resource: &Rc<R>) {
    loop {
        let held = resource.held();
        let next = resource.scheduler().borrow_mut().poll(held);
        match next {
            Next::Run(call) => call.start(resource),
            Next::Purge(calls, mode) => purge(resource, calls, mode),
            Next::Idle => break,
        }
    }
    resource.settled();
}

fn purge<R: Resource>(resource: &Rc<R>, calls: Vec<Call<R>>, mode: PurgeMode) {
    match mode {
        PurgeMode::Release => {
            debug!(count = calls.len(), "releasing queued calls unfired");
            drop(calls);
        }
        PurgeMode::Reject => {
            let err = resource.closed_error();
            debug!(count = calls.len(), error = %err, "rejecting queued calls");
            let mut unheard = false;
            for call in calls {
                unheard |= call.reject(err.clone()).is_some();
            }
            if unheard {
                resource.emitter().emit(Event::Error(err));
            }
        }
    }
}
