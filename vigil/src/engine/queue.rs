use crate::event::AccountEvent;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;
use tracing::warn;

/// Outcome of a queue push, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// A quote was shed to make room (the oldest queued quote, or the
    /// incoming one when nothing older could go).
    ShedQuote,
}

/// Bounded per-account event queue.
///
/// Backlog protection sheds quotes first - quotes are refreshable, while
/// trade/position/order events are never dropped (the queue grows past
/// capacity for them rather than lose one).
#[derive(Debug)]
pub struct AccountQueue {
    inner: Mutex<VecDeque<AccountEvent>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl AccountQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    pub fn push(&self, event: AccountEvent) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.len() < self.capacity {
                inner.push_back(event);
                PushOutcome::Queued
            } else if let Some(oldest_quote) =
                inner.iter().position(|queued| queued.is_quote())
            {
                // Full: drop the oldest queued quote to make room.
                inner.remove(oldest_quote);
                inner.push_back(event);
                PushOutcome::ShedQuote
            } else if event.is_quote() {
                // Full of undroppable events; the incoming quote loses.
                PushOutcome::ShedQuote
            } else {
                inner.push_back(event);
                PushOutcome::Queued
            }
        };

        if outcome == PushOutcome::ShedQuote {
            warn!("account queue full, shed a quote event");
        }
        self.notify.notify_one();
        outcome
    }

    /// Await the next event; `None` once closed and drained.
    pub async fn pop(&self) -> Option<AccountEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.inner.lock().pop_front() {
                return Some(event);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue: pending events still drain, then `pop` returns
    /// `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
