// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resource-level event fan-out.

use std::cell::RefCell;

use serialite_core::{Event, Result};
use tokio::sync::mpsc;
use tracing::warn;

use crate::reply::Reply;

/// Subscriber list for one resource. Lives on the owning thread.
pub(crate) struct Emitter {
    resource: &'static str,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<Event>>>,
}

impl Emitter {
    pub(crate) fn new(resource: &'static str) -> Self {
        Self {
            resource,
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Send `event` to every live subscriber. Returns whether anyone got it.
    pub(crate) fn emit(&self, event: Event) -> bool {
        let mut heard = false;
        self.subscribers.borrow_mut().retain(|tx| {
            let delivered = tx.send(event.clone()).is_ok();
            heard |= delivered;
            delivered
        });
        if !heard {
            if let Event::Error(err) = &event {
                warn!(resource = self.resource, error = %err, "unhandled error event");
            }
        }
        heard
    }

    /// Deliver `result` to `reply`; an error nobody hears becomes an
    /// [`Event::Error`] on this resource and an unheard success is dropped.
    pub(crate) fn deliver<T>(&self, reply: Reply<T>, result: Result<T>) {
        if let Some(Err(err)) = reply.send(result) {
            self.emit(Event::Error(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialite_core::SerialiteError;
    use tracing_test::traced_test;

    #[test]
    fn every_subscriber_receives_events() {
        let emitter = Emitter::new("test");
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();
        assert!(emitter.emit(Event::Open));
        assert_eq!(a.try_recv().unwrap(), Event::Open);
        assert_eq!(b.try_recv().unwrap(), Event::Open);
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let emitter = Emitter::new("test");
        drop(emitter.subscribe());
        assert!(!emitter.emit(Event::Close));
        assert!(emitter.subscribers.borrow().is_empty());
    }

    #[test]
    fn unheard_error_reply_becomes_event() {
        let emitter = Emitter::new("test");
        let mut events = emitter.subscribe();
        emitter.deliver(Reply::<()>::none(), Err(SerialiteError::misuse("boom")));
        emitter.deliver(Reply::none(), Ok(()));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::Error(SerialiteError::misuse("boom"))
        );
        assert!(events.try_recv().is_err());
    }

    #[traced_test]
    #[test]
    fn unheard_error_event_is_logged() {
        let emitter = Emitter::new("statement");
        emitter.emit(Event::Error(SerialiteError::Abandoned));
        assert!(logs_contain("unhandled error event"));
    }
}
