// =============================================================================
// SequencedEventQueue<T> — bounded per-symbol FIFO, drop-oldest on overflow
// =============================================================================
//
// Every symbol owns exactly one of these. Producers (the WebSocket demuxer)
// call `enqueue`; a single consumer task calls `drain` in a loop and feeds
// each event to the metric pipeline handler in arrival order. This is the
// one point where unrelated tasks touch a symbol's state concurrently, so it
// is kept intentionally tiny: a `parking_lot::Mutex`-guarded `VecDeque` plus
// two counters.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

/// Default bound, per §4.5; overridable per deployment.
pub const DEFAULT_QUEUE_BOUND: usize = 5000;

struct Inner<T> {
    items: VecDeque<T>,
    dropped: u64,
}

/// A bounded FIFO for a single symbol's events. Overflow drops the oldest
/// retained event and increments `dropped_count`.
pub struct SequencedEventQueue<T> {
    symbol: String,
    bound: usize,
    inner: Mutex<Inner<T>>,
}

impl<T> SequencedEventQueue<T> {
    pub fn new(symbol: impl Into<String>, bound: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bound,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                dropped: 0,
            }),
        }
    }

    pub fn with_default_bound(symbol: impl Into<String>) -> Self {
        Self::new(symbol, DEFAULT_QUEUE_BOUND)
    }

    /// Push one event. If the queue is already at `bound`, the oldest event
    /// is dropped and `dropped_count` is incremented.
    pub fn enqueue(&self, event: T) {
        let mut inner = self.inner.lock();
        if inner.items.len() >= self.bound {
            inner.items.pop_front();
            inner.dropped += 1;
            warn!(symbol = %self.symbol, dropped_total = inner.dropped, "queue: overflow, dropped oldest event");
        }
        inner.items.push_back(event);
    }

    /// Drain all currently queued events in FIFO order. The caller is the
    /// single consumer; this never blocks.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.items.drain(..).collect()
    }

    pub fn queue_length(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        let q = SequencedEventQueue::new("BTCUSDT", 10);
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.drain(), vec![0, 1, 2, 3, 4]);
        assert_eq!(q.queue_length(), 0);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let q = SequencedEventQueue::new("BTCUSDT", 3);
        for i in 0..5 {
            q.enqueue(i);
        }
        assert_eq!(q.queue_length(), 3);
        assert_eq!(q.dropped_count(), 2);
        assert_eq!(q.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn drop_count_matches_saturation_formula() {
        let bound = 4;
        let q = SequencedEventQueue::new("ETHUSDT", bound);
        let total_enqueued: u64 = 10;
        for i in 0..total_enqueued {
            q.enqueue(i);
        }
        let retained = q.queue_length() as u64;
        assert_eq!(retained, bound as u64);
        assert_eq!(q.dropped_count(), total_enqueued - retained);
    }
}
