// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker-thread gates.
//!
//! A `Gate` installed on a [`MockEngine`](crate::MockEngine) call key parks
//! every worker that reaches that call until the test opens it. Tests use the
//! waiting count to know a worker is in flight before asserting on scheduler
//! state.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
    passed: usize,
}

/// A one-way barrier for worker threads.
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release every parked worker and let later arrivals through.
    pub fn open(&self) {
        self.lock().open = true;
        self.cond.notify_all();
    }

    /// Number of workers currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.lock().waiting
    }

    /// Number of workers that have gone through the gate.
    pub fn passed(&self) -> usize {
        self.lock().passed
    }

    /// Park the calling worker until the gate opens.
    pub(crate) fn pass(&self) {
        let mut state = self.lock();
        state.waiting += 1;
        while !state.open {
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
        state.passed += 1;
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
