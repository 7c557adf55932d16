//! # Sentinel Shutdown
//!
//! [`BoundedQueue`] has no closed state. Consumers stop when they dequeue an
//! explicit [`Envelope::Shutdown`], and producers between them enqueue exactly
//! one such sentinel per consumer.
//!
//! ```text
//!   Producer 0 ── payloads ... Shutdown x (C / P + C % P) ──┐
//!   Producer 1 ── payloads ... Shutdown x (C / P)         ──┼──> queue ──> C consumers
//!   Producer 2 ── payloads ... Shutdown x (C / P)         ──┘             (one sentinel each)
//! ```
//!
//! A consumer stops on its first sentinel and never takes another, so every
//! consumer exits exactly once without a shared counter or closed flag. When
//! every producer owes at least one sentinel, each producer's payloads sit
//! ahead of its own sentinels, so the last consumer to stop has drained them
//! all.

use crate::queue::BoundedQueue;

/// A queue item: either real work or the terminal sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope<T> {
    /// Work for a consumer.
    Payload(T),
    /// Tells the consumer that dequeues it to stop.
    Shutdown,
}

impl<T> Envelope<T> {
    /// Returns true for the sentinel.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Returns the payload, or `None` for the sentinel.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Self::Payload(item) => Some(item),
            Self::Shutdown => None,
        }
    }
}

impl<T> From<T> for Envelope<T> {
    fn from(item: T) -> Self {
        Self::Payload(item)
    }
}

/// How many sentinels each producer must enqueue.
///
/// The first producer picks up the remainder, so the total always equals the
/// consumer count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownPlan {
    producers: usize,
    consumers: usize,
}

impl ShutdownPlan {
    /// Creates a plan for `producers` producers and `consumers` consumers.
    ///
    /// # Panics
    ///
    /// Panics if there are no producers.
    #[must_use]
    pub fn new(producers: usize, consumers: usize) -> Self {
        assert!(producers > 0, "At least one producer is required");
        Self { producers, consumers }
    }

    /// Returns the number of producers.
    #[must_use]
    pub const fn producers(&self) -> usize {
        self.producers
    }

    /// Returns the number of consumers (and sentinels).
    #[must_use]
    pub const fn consumers(&self) -> usize {
        self.consumers
    }

    /// Sentinels owed by the producer at `producer`.
    ///
    /// # Panics
    ///
    /// Panics if `producer` is out of range.
    #[must_use]
    pub fn sentinels_for(&self, producer: usize) -> usize {
        assert!(
            producer < self.producers,
            "Producer index {producer} out of range ({} producers)",
            self.producers
        );

        let share = self.consumers / self.producers;
        if producer == 0 {
            share + self.consumers % self.producers
        } else {
            share
        }
    }

    /// Enqueues the sentinels owed by `producer`, blocking while the queue is
    /// full. Call after the producer's last payload.
    ///
    /// A producer that owes no sentinel (fewer consumers than producers) has
    /// nothing ordering its payloads before the last sentinel. In that setup
    /// emit only after every producer has finished.
    pub fn emit<T>(&self, producer: usize, queue: &BoundedQueue<Envelope<T>>) {
        let count = self.sentinels_for(producer);
        for _ in 0..count {
            queue.put(Envelope::Shutdown);
        }
        tracing::debug!(producer, count, "producer emitted shutdown sentinels");
    }
}

/// Runs a consumer loop until the first sentinel.
///
/// Every payload is passed to `handler` in dequeue order. The sentinel itself
/// is dropped unprocessed. Returns the number of payloads handled.
pub fn consume<T, F>(queue: &BoundedQueue<Envelope<T>>, mut handler: F) -> usize
where
    F: FnMut(T),
{
    let mut handled = 0;
    loop {
        match queue.take() {
            Envelope::Payload(item) => {
                handler(item);
                handled += 1;
            }
            Envelope::Shutdown => break,
        }
    }
    tracing::debug!(handled, "consumer received shutdown");
    handled
}
