// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cross-thread mailbox.
//!
//! Any thread may push into a [`Mailbox`] through a [`MailboxSender`]. Items
//! are appended to a mutex-guarded vector and the owning thread is woken. The
//! owning thread drains by swapping the whole vector out under the lock and
//! delivering the batch to the handler after the lock is released, so pushes
//! that race with a drain land in the next batch and are never lost or
//! reordered.
//!
//! A mailbox must be created inside a [`tokio::task::LocalSet`]: its wake task
//! is spawned with `spawn_local`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::{self, JoinHandle};
use tracing::trace;

struct Inbox<T> {
    items: Vec<T>,
    closed: bool,
}

struct Shared<T> {
    inbox: Mutex<Inbox<T>>,
    wake: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inbox<T>> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The pushing side of a mailbox. Cheap to clone and `Send` for `T: Send`.
pub struct MailboxSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Append `item` and wake the owning thread. Returns `false`, dropping the
    /// item, once the mailbox is closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut inbox = self.shared.lock();
            if inbox.closed {
                return false;
            }
            inbox.items.push(item);
        }
        self.shared.wake.notify_one();
        true
    }
}

type Handler<T> = Box<dyn FnMut(T)>;

struct Core<T> {
    shared: Arc<Shared<T>>,
    handler: RefCell<Option<Handler<T>>>,
    dispatching: Cell<bool>,
    close_deferred: Cell<bool>,
    closed: Cell<bool>,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl<T> Core<T> {
    fn drain(&self) {
        if self.dispatching.replace(true) {
            // The outer drain picks up whatever arrived.
            return;
        }
        loop {
            let batch = std::mem::take(&mut self.shared.lock().items);
            if batch.is_empty() {
                break;
            }
            trace!(items = batch.len(), "draining mailbox");
            if let Some(handler) = self.handler.borrow_mut().as_mut() {
                for item in batch {
                    handler(item);
                }
            }
        }
        self.dispatching.set(false);
        if self.close_deferred.replace(false) {
            self.close();
        }
    }

    fn close(&self) {
        if self.closed.get() {
            return;
        }
        if self.dispatching.get() {
            self.close_deferred.set(true);
            return;
        }
        self.shared.lock().closed = true;
        self.drain();
        self.closed.set(true);
        if let Some(task) = self.task.borrow_mut().take() {
            task.abort();
        }
        self.handler.borrow_mut().take();
    }
}

/// The owning-thread side of a mailbox.
pub struct Mailbox<T> {
    core: Rc<Core<T>>,
}

impl<T: 'static> Mailbox<T> {
    /// Create a mailbox delivering to `handler` and start its wake task.
    pub fn new(handler: impl FnMut(T) + 'static) -> Self {
        let core = Rc::new(Core {
            shared: Arc::new(Shared {
                inbox: Mutex::new(Inbox {
                    items: Vec::new(),
                    closed: false,
                }),
                wake: Notify::new(),
            }),
            handler: RefCell::new(Some(Box::new(handler))),
            dispatching: Cell::new(false),
            close_deferred: Cell::new(false),
            closed: Cell::new(false),
            task: RefCell::new(None),
        });

        let weak = Rc::downgrade(&core);
        let shared = Arc::clone(&core.shared);
        let wake_task = task::spawn_local(async move {
            loop {
                shared.wake.notified().await;
                match weak.upgrade() {
                    Some(core) => core.drain(),
                    None => break,
                }
            }
        });
        *core.task.borrow_mut() = Some(wake_task);

        Self { core }
    }
}

impl<T> Mailbox<T> {
    pub fn sender(&self) -> MailboxSender<T> {
        MailboxSender {
            shared: Arc::clone(&self.core.shared),
        }
    }

    /// Deliver everything pushed so far. A no-op when called from inside the
    /// handler.
    pub fn drain(&self) {
        self.core.drain();
    }

    /// Refuse further pushes, deliver what is left and release the handler.
    ///
    /// Idempotent. Called from inside the handler, it takes effect once the
    /// active drain finishes.
    pub fn close(&self) {
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.get()
    }
}

impl<T> Drop for Mailbox<T> {
    fn drop(&mut self) {
        self.core.close();
    }
}
