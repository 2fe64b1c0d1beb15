//! Bounded, lossy, single-consumer queue.
//!
//! A full queue drops its oldest item so the producer never blocks.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    dropped: u64,
}

pub struct SubscriberQueue<T> {
    inner: Mutex<Inner<T>>,
    ready: Notify,
    capacity: usize,
}

impl<T> SubscriberQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            ready: Notify::new(),
            capacity,
        }
    }

    /// Enqueue, evicting the oldest item when full. Returns false once closed.
    pub fn push(&self, item: T) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            if inner.items.len() >= self.capacity {
                inner.items.pop_front();
                inner.dropped += 1;
                tracing::trace!(dropped = inner.dropped, "subscriber queue full, dropped oldest");
            }
            inner.items.push_back(item);
        }
        self.ready.notify_one();
        true
    }

    /// Wait for the next item. `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Stop accepting items. Already queued items can still be received.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Items evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
