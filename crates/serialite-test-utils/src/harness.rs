// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owning-thread harness for scheduling tests.
//!
//! Resources must be created inside a `LocalSet`, so every runtime test wraps
//! its body in [`run_local`] under `#[tokio::test]`.

use std::future::Future;
use std::time::Duration;

use serialite_core::{Row, Value};
use tokio::task::LocalSet;

/// How long [`eventually`] polls before giving up.
const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `fut` to completion on a fresh `LocalSet`.
pub async fn run_local<F: Future>(fut: F) -> F::Output {
    LocalSet::new().run_until(fut).await
}

/// Poll `cond` while yielding to the owning thread, returning `true` as soon
/// as it holds and `false` once the timeout elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENTUALLY_TIMEOUT;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("condition did not hold before the timeout");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    )
}
