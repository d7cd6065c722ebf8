// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The owning thread and its worker pool.
//!
//! Resources are `!Send` and must be created inside a tokio `LocalSet` on a
//! current-thread runtime. [`OwnerRuntime`] builds that pairing; the blocking
//! pool of the same runtime is the worker pool.

use std::future::Future;
use std::io;

use tokio::runtime::{Builder, Runtime};
use tokio::task::LocalSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Upper bound on concurrently running engine calls.
    pub max_worker_threads: usize,
    pub thread_name: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_worker_threads: 8,
            thread_name: "serialite-worker".into(),
        }
    }
}

/// A current-thread runtime whose thread owns every resource created on it.
pub struct OwnerRuntime {
    runtime: Runtime,
}

impl OwnerRuntime {
    pub fn new(options: &RuntimeOptions) -> io::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(options.max_worker_threads.max(1))
            .thread_name(options.thread_name.clone())
            .build()?;
        debug!(
            max_worker_threads = options.max_worker_threads,
            "owner runtime started"
        );
        Ok(Self { runtime })
    }

    /// Drive `fut` to completion on the calling thread, which becomes the
    /// owning thread for its duration.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        LocalSet::new().block_on(&self.runtime, fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn local_tasks_run_on_the_owner_runtime() {
        let rt = OwnerRuntime::new(&RuntimeOptions::default()).unwrap();
        let out = rt.block_on(async {
            let shared = Rc::new(20);
            let inner = Rc::clone(&shared);
            let worker = tokio::task::spawn_blocking(|| 1);
            let local = tokio::task::spawn_local(async move { *inner + 1 });
            local.await.unwrap() + worker.await.unwrap() + *shared
        });
        assert_eq!(out, 42);
    }

    #[test]
    fn zero_workers_is_clamped() {
        let opts = RuntimeOptions {
            max_worker_threads: 0,
            ..RuntimeOptions::default()
        };
        assert!(OwnerRuntime::new(&opts).is_ok());
    }
}
