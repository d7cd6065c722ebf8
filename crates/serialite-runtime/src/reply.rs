// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-operation continuations.
//!
//! Every scheduled operation carries exactly one [`Reply`]. It is consumed
//! once, either by the operation's completion step or by a queue purge.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serialite_core::{Result, SerialiteError};
use tokio::sync::oneshot;

/// Where an operation's outcome goes.
pub enum Reply<T> {
    /// Resolve a [`Pending`] future.
    Channel(oneshot::Sender<Result<T>>),
    /// Run a closure on the owning thread.
    Callback(Box<dyn FnOnce(Result<T>)>),
    /// No continuation. Errors surface as resource error events.
    None,
}

impl<T> Reply<T> {
    /// A reply paired with the future it resolves.
    pub fn channel() -> (Self, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (Reply::Channel(tx), Pending { rx })
    }

    pub fn callback(f: impl FnOnce(Result<T>) + 'static) -> Self {
        Reply::Callback(Box::new(f))
    }

    pub fn none() -> Self {
        Reply::None
    }

    /// Whether delivering to this reply would reach anyone.
    pub fn is_listening(&self) -> bool {
        match self {
            Reply::Channel(tx) => !tx.is_closed(),
            Reply::Callback(_) => true,
            Reply::None => false,
        }
    }

    /// Deliver `result`, handing it back if nobody was listening.
    pub fn send(self, result: Result<T>) -> Option<Result<T>> {
        match self {
            Reply::Channel(tx) => tx.send(result).err(),
            Reply::Callback(f) => {
                f(result);
                None
            }
            Reply::None => Some(result),
        }
    }
}

/// Run `f` with a fresh channel reply and return the matching future.
pub(crate) fn pending<T>(f: impl FnOnce(Reply<T>)) -> Pending<T> {
    let (reply, pending) = Reply::channel();
    f(reply);
    pending
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Reply::Channel(_) => "Channel",
            Reply::Callback(_) => "Callback",
            Reply::None => "None",
        };
        f.debug_tuple("Reply").field(&kind).finish()
    }
}

/// The future side of [`Reply::channel`].
///
/// Resolves to [`SerialiteError::Abandoned`] if the operation was discarded
/// without running.
#[derive(Debug)]
#[must_use = "a pending result does nothing unless awaited or dropped deliberately"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SerialiteError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[tokio::test]
    async fn channel_reply_resolves_pending() {
        let (reply, pending) = Reply::channel();
        assert!(reply.is_listening());
        assert!(reply.send(Ok(7)).is_none());
        assert_eq!(pending.await, Ok(7));
    }

    #[tokio::test]
    async fn dropped_reply_abandons_pending() {
        let (reply, pending) = Reply::<()>::channel();
        drop(reply);
        assert_eq!(pending.await, Err(SerialiteError::Abandoned));
    }

    #[test]
    fn dropped_pending_hands_result_back() {
        let (reply, pending) = Reply::channel();
        drop(pending);
        assert!(!reply.is_listening());
        assert_eq!(reply.send(Ok(1)), Some(Ok(1)));
    }

    #[test]
    fn callback_runs_inline() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);
        let reply = Reply::callback(move |r: Result<i32>| *sink.borrow_mut() = Some(r));
        assert!(reply.send(Err(SerialiteError::misuse("nope"))).is_none());
        assert_eq!(
            *seen.borrow(),
            Some(Err(SerialiteError::misuse("nope")))
        );
    }

    #[test]
    fn none_reply_is_unheard() {
        let reply = Reply::<()>::none();
        assert!(!reply.is_listening());
        assert!(reply.send(Ok(())).is_some());
    }
}
