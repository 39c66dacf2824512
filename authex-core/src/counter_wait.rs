//! Value-threshold rendezvous between the follower and external readers.
//!
//! Readers block until the follower has durably applied a given event id;
//! the follower publishes progress with [`CounterWait::update`]. The value
//! only moves forward except through [`CounterWait::set_baseline`], the one
//! sanctioned backward path, taken when a snapshot re-based the image and
//! the event-id axis jumped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use authex_model::EventId;
use tokio::sync::watch;

/// Result of a [`CounterWait::wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The counter reached the requested threshold.
    Ok,
    /// The timeout elapsed first.
    TimedOut,
}

#[derive(Debug)]
pub struct CounterWait {
    value: watch::Sender<i64>,
    /// Image id recorded by the most recent re-basing, for introspection.
    baseline: AtomicI64,
}

impl Default for CounterWait {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterWait {
    pub fn new() -> Self {
        Self::with_initial(EventId(0))
    }

    pub fn with_initial(initial: EventId) -> Self {
        let (value, _) = watch::channel(initial.as_i64());
        Self {
            value,
            baseline: AtomicI64::new(0),
        }
    }

    /// Current counter value.
    pub fn value(&self) -> EventId {
        EventId(*self.value.borrow())
    }

    /// Image id recorded by the most recent [`Self::set_baseline`] call.
    pub fn baseline(&self) -> EventId {
        EventId(self.baseline.load(Ordering::Acquire))
    }

    /// Advance the counter to `n` if it is ahead of the current value and
    /// wake every waiter with a threshold at or below it. Values at or below
    /// the current one are ignored; the counter never moves backward here.
    pub fn update(&self, n: EventId) {
        self.value.send_if_modified(|value| {
            if n.as_i64() > *value {
                *value = n.as_i64();
                true
            } else {
                false
            }
        });
    }

    /// Unconditionally set the counter to `n`, waking waiters with a
    /// threshold at or below it. Waiters above `n` stay blocked. This is the
    /// sole backward path; regular progress goes through [`Self::update`].
    pub fn reset(&self, n: EventId) {
        self.value.send_if_modified(|value| {
            if *value != n.as_i64() {
                *value = n.as_i64();
                true
            } else {
                false
            }
        });
    }

    /// Re-base the counter after a snapshot moved the image: records the new
    /// image id and resets the counter to the event id observed alongside
    /// it. Threshold semantics are thereby recomputed against the new
    /// baseline instead of being inferred inside a wake-up helper.
    pub fn set_baseline(&self, image_id: EventId, event_id: EventId) {
        self.baseline.store(image_id.as_i64(), Ordering::Release);
        self.reset(event_id);
    }

    /// Block until the counter reaches `threshold` or `timeout` elapses.
    ///
    /// Ordering guarantee: once an `update(n)` call has returned, a
    /// `wait(m, _)` with `m <= n` returns [`WaitOutcome::Ok`] immediately.
    pub async fn wait(&self, threshold: EventId, timeout: Duration) -> WaitOutcome {
        let mut rx = self.value.subscribe();
        let reached = rx.wait_for(|value| *value >= threshold.as_i64());
        match tokio::time::timeout(timeout, reached).await {
            Ok(Ok(_)) => WaitOutcome::Ok,
            // The sender lives inside self, so closure cannot happen while a
            // waiter borrows it; treat it like an elapsed timeout anyway.
            Ok(Err(_)) => WaitOutcome::TimedOut,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}
