// SPDX-FileCopyrightText: 2026 Serialite Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row-by-row streaming over a [`Mailbox`].

use std::cell::Cell;
use std::rc::Rc;

use serialite_core::{Result, Row};

use crate::mailbox::{Mailbox, MailboxSender};

/// What a row-producing worker pushes.
#[derive(Debug)]
pub enum RowItem {
    Row(Row),
    /// Pushed last, once the statement is exhausted or failed.
    Done(Result<()>),
}

type Completion = Box<dyn FnOnce(Result<usize>)>;

/// Delivers streamed rows to a per-row handler, then fires a completion
/// continuation exactly once with the number of rows retrieved.
pub struct RowRelay {
    mailbox: Mailbox<RowItem>,
    retrieved: Rc<Cell<usize>>,
}

impl RowRelay {
    pub fn new(
        mut on_row: impl FnMut(Row) + 'static,
        on_done: impl FnOnce(Result<usize>) + 'static,
    ) -> Self {
        let retrieved = Rc::new(Cell::new(0));
        let counter = Rc::clone(&retrieved);
        let mut completion: Option<Completion> = Some(Box::new(on_done));
        let mailbox = Mailbox::new(move |item: RowItem| match item {
            RowItem::Row(row) => {
                counter.set(counter.get() + 1);
                on_row(row);
            }
            RowItem::Done(outcome) => {
                if let Some(done) = completion.take() {
                    done(outcome.map(|()| counter.get()));
                }
            }
        });
        Self { mailbox, retrieved }
    }

    pub fn sender(&self) -> MailboxSender<RowItem> {
        self.mailbox.sender()
    }

    /// Rows delivered to the handler so far.
    pub fn retrieved(&self) -> usize {
        self.retrieved.get()
    }

    /// Flush remaining rows (and the completion, if pushed) and stop.
    pub fn close(&self) {
        self.mailbox.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialite_core::{SerialiteError, Value};
    use std::cell::RefCell;
    use serialite_test_utils::run_local;
    use std::thread;

    fn numbered(n: i64) -> Row {
        Row::new(vec![("n".into(), Value::Integer(n))])
    }

    #[tokio::test]
    async fn rows_then_exactly_one_completion() {
        run_local(async {
            let rows = Rc::new(RefCell::new(Vec::new()));
            let done = Rc::new(RefCell::new(Vec::new()));
            let (row_sink, done_sink) = (Rc::clone(&rows), Rc::clone(&done));
            let relay = RowRelay::new(
                move |row| row_sink.borrow_mut().push(row),
                move |result| done_sink.borrow_mut().push(result),
            );

            let tx = relay.sender();
            thread::spawn(move || {
                for n in 0..3 {
                    tx.push(RowItem::Row(numbered(n)));
                }
                tx.push(RowItem::Done(Ok(())));
                // A second terminal marker must not fire the completion again.
                tx.push(RowItem::Done(Ok(())));
            })
            .join()
            .unwrap();

            relay.close();
            assert_eq!(*rows.borrow(), vec![numbered(0), numbered(1), numbered(2)]);
            assert_eq!(*done.borrow(), vec![Ok(3)]);
            assert_eq!(relay.retrieved(), 3);
        })
        .await;
    }

    #[tokio::test]
    async fn failure_reaches_the_completion() {
        run_local(async {
            let done = Rc::new(RefCell::new(None));
            let sink = Rc::clone(&done);
            let relay = RowRelay::new(|_| {}, move |result| *sink.borrow_mut() = Some(result));
            relay.sender().push(RowItem::Row(numbered(1)));
            relay
                .sender()
                .push(RowItem::Done(Err(SerialiteError::misuse("interrupted"))));
            relay.close();
            assert_eq!(
                *done.borrow(),
                Some(Err(SerialiteError::misuse("interrupted")))
            );
        })
        .await;
    }
}
