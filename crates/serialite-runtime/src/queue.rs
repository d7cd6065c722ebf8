// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queued calls.
//!
//! A [`Call`] pairs a type-erased work starter with its [`Baton`]. It is
//! consumed exactly once: started, rejected with an error, or dropped
//! unfired.

use std::rc::Rc;

use serialite_core::SerialiteError;

use crate::reply::Reply;

/// Operation parameters plus the caller's continuation.
pub(crate) struct Baton<P, T> {
    pub(crate) params: P,
    pub(crate) reply: Reply<T>,
}

/// Work that can be started against resource `R` or refused.
pub(crate) trait Job<R> {
    fn start(self: Box<Self>, resource: &Rc<R>);

    /// Refuse the job with `err`. Returns the error if nobody heard it.
    fn reject(self: Box<Self>, err: SerialiteError) -> Option<SerialiteError>;
}

struct Op<P, T, F> {
    baton: Baton<P, T>,
    begin: F,
}

impl<R, P, T, F> Job<R> for Op<P, T, F>
where
    F: FnOnce(&Rc<R>, Baton<P, T>),
{
    fn start(self: Box<Self>, resource: &Rc<R>) {
        let Op { baton, begin } = *self;
        begin(resource, baton);
    }

    fn reject(self: Box<Self>, err: SerialiteError) -> Option<SerialiteError> {
        match self.baton.reply.send(Err(err)) {
            Some(Err(err)) => Some(err),
            _ => None,
        }
    }
}

/// A queued unit of work and its effective exclusivity.
pub(crate) struct Call<R> {
    job: Box<dyn Job<R>>,
    pub(crate) exclusive: bool,
}

impl<R: 'static> Call<R> {
    /// A call that runs `begin` with its baton when started.
    pub(crate) fn new<P, T, F>(exclusive: bool, params: P, reply: Reply<T>, begin: F) -> Self
    where
        P: 'static,
        T: 'static,
        F: FnOnce(&Rc<R>, Baton<P, T>) + 'static,
    {
        Self::from_job(
            exclusive,
            Box::new(Op {
                baton: Baton { params, reply },
                begin,
            }),
        )
    }

    pub(crate) fn from_job(exclusive: bool, job: Box<dyn Job<R>>) -> Self {
        Self { job, exclusive }
    }
}

impl<R> Call<R> {
    pub(crate) fn start(self, resource: &Rc<R>) {
        self.job.start(resource);
    }

    pub(crate) fn reject(self, err: SerialiteError) -> Option<SerialiteError> {
        self.job.reject(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        started: RefCell<Vec<u32>>,
    }

    #[test]
    fn start_hands_params_to_begin() {
        let recorder = Rc::new(Recorder {
            started: RefCell::new(Vec::new()),
        });
        let call = Call::new(false, 42u32, Reply::<()>::none(), |p: &Rc<Recorder>, baton| {
            p.started.borrow_mut().push(baton.params);
        });
        call.start(&recorder);
        assert_eq!(*recorder.started.borrow(), vec![42]);
    }

    #[tokio::test]
    async fn reject_reaches_a_listening_reply() {
        let (reply, pending) = Reply::<()>::channel();
        let call: Call<Recorder> = Call::new(true, (), reply, |_, _| unreachable!());
        assert!(call.reject(SerialiteError::misuse("closed")).is_none());
        assert_eq!(pending.await, Err(SerialiteError::misuse("closed")));
    }

    #[test]
    fn reject_without_listener_hands_error_back() {
        let call: Call<Recorder> = Call::new(false, (), Reply::<()>::none(), |_, _| unreachable!());
        assert_eq!(
            call.reject(SerialiteError::misuse("closed")),
            Some(SerialiteError::misuse("closed"))
        );
    }
}
