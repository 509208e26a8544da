//! # Outbound Queue
//!
//! Bounded per-peer queue of frame batches. One batch is whatever a single
//! flush produced; it is kept or evicted as a unit, so a peer never sees a
//! batch with a hole in it.
//!
//! Pushing never blocks. When the frames queued would exceed the capacity,
//! the oldest batches are evicted until the new one fits. A batch larger
//! than the whole capacity is still accepted, alone. The batch the consumer
//! has started reading is never evicted.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of [`OutboundQueue::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Batch queued.
    Queued,
    /// Batch queued after evicting older batches.
    DroppedOldest {
        /// Frames evicted.
        frames: usize,
    },
    /// Queue is closed; batch discarded.
    Closed,
}

/// Frame batches in arrival order, bounded by frame count.
#[derive(Debug)]
pub struct BatchQueue {
    batches: VecDeque<VecDeque<Vec<u8>>>,
    /// Frames across all batches.
    queued: usize,
    capacity: usize,
    /// The front batch has handed out at least one frame.
    front_started: bool,
}

impl BatchQueue {
    /// Creates a queue holding about `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            batches: VecDeque::new(),
            queued: 0,
            capacity: capacity.max(1),
            front_started: false,
        }
    }

    /// Appends a batch, evicting older ones as needed. Returns the number of
    /// frames evicted.
    pub fn push(&mut self, batch: Vec<Vec<u8>>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let incoming = batch.len();
        let mut evicted = 0;
        while self.queued + incoming > self.capacity {
            let victim = usize::from(self.front_started);
            let Some(dropped) = self.batches.remove(victim) else {
                break;
            };
            self.queued -= dropped.len();
            evicted += dropped.len();
        }
        self.queued += incoming;
        self.batches.push_back(batch.into());
        evicted
    }

    /// Takes the next frame in order.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let front = self.batches.front_mut()?;
        let frame = front.pop_front();
        if front.is_empty() {
            self.batches.pop_front();
            self.front_started = false;
        } else {
            self.front_started = true;
        }
        if frame.is_some() {
            self.queued -= 1;
        }
        frame
    }

    /// Discards everything.
    pub fn clear(&mut self) {
        self.batches.clear();
        self.queued = 0;
        self.front_started = false;
    }

    /// Frames queued.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.queued
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.queued == 0
    }
}

struct QueueState {
    batches: BatchQueue,
    closed: bool,
}

/// [`BatchQueue`] shared between the tick thread (producer) and the
/// reactor's writer task (consumer).
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OutboundQueue {
    /// Creates a queue holding about `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                batches: BatchQueue::new(capacity),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues a batch without blocking.
    pub fn push(&self, batch: Vec<Vec<u8>>) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            match state.batches.push(batch) {
                0 => PushOutcome::Queued,
                frames => PushOutcome::DroppedOldest { frames },
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Takes the next frame, if any.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.state.lock().batches.pop()
    }

    /// Waits for the next frame. `None` once closed and drained.
    ///
    /// Single consumer only.
    pub async fn next(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.batches.pop() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Discards queued frames and refuses new ones.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.batches.clear();
        }
        self.notify.notify_one();
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().batches.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_oldest_batch_when_full() {
        let queue = OutboundQueue::new(3);
        assert_eq!(queue.push(vec![vec![1], vec![2]]), PushOutcome::Queued);
        assert_eq!(queue.push(vec![vec![3]]), PushOutcome::Queued);
        assert_eq!(
            queue.push(vec![vec![4]]),
            PushOutcome::DroppedOldest { frames: 2 }
        );

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_pop(), Some(vec![3]));
        assert_eq!(queue.try_pop(), Some(vec![4]));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_oversized_batch_kept_whole() {
        let mut batches = BatchQueue::new(2);
        assert_eq!(batches.push(vec![vec![0]]), 0);
        assert_eq!(batches.push(vec![vec![1], vec![2], vec![3], vec![4]]), 1);

        assert_eq!(batches.len(), 4);
        let frames: Vec<_> = std::iter::from_fn(|| batches.pop()).collect();
        assert_eq!(frames, vec![vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_started_batch_never_evicted() {
        let mut batches = BatchQueue::new(3);
        batches.push(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(batches.pop(), Some(vec![1]));

        batches.push(vec![vec![4], vec![5]]);
        assert_eq!(batches.push(vec![vec![6]]), 2);

        let frames: Vec<_> = std::iter::from_fn(|| batches.pop()).collect();
        assert_eq!(frames, vec![vec![2], vec![3], vec![6]]);
    }

    #[test]
    fn test_close_discards() {
        let queue = OutboundQueue::new(4);
        queue.push(vec![vec![1]]);
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert_eq!(queue.push(vec![vec![2]]), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.push(vec![vec![9]]);

        assert_eq!(consumer.await.unwrap(), Some(vec![9]));
    }

    #[tokio::test]
    async fn test_next_ends_after_close() {
        let queue = OutboundQueue::new(4);
        queue.close();
        assert_eq!(queue.next().await, None);
    }
}
