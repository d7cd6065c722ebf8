// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker-pool handoff.

use tokio::task;
use tracing::{debug, error};

/// Run `work` on the blocking worker pool, then `after` with its output back
/// on the owning thread.
///
/// `work` performs one engine call and returns its outcome by value; it must
/// not touch scheduler state. A panicking `work` is a logic error and is
/// re-raised on the owning thread.
pub(crate) fn submit<T, W, A>(label: &'static str, work: W, after: A)
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    A: FnOnce(T) + 'static,
{
    debug!(op = label, "dispatching to worker");
    let worker = task::spawn_blocking(work);
    task::spawn_local(async move {
        match worker.await {
            Ok(output) => after(output),
            Err(err) if err.is_panic() => {
                error!(op = label, "worker panicked");
                std::panic::resume_unwind(err.into_panic());
            }
            Err(err) => debug!(op = label, error = %err, "worker cancelled before completing"),
        }
    });
}
