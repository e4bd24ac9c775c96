//! Blocking fixed-capacity queue with graceful half-close.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use graphex_common::{GraphexError, Result};

#[derive(Debug)]
struct BufferState<T> {
    items: VecDeque<T>,
    /// Cleared by `close`; producers may not add afterwards.
    more: bool,
}

/// Intra-process producer/consumer queue.
///
/// `add` blocks while the buffer is full, `retrieve` blocks while it is empty
/// and not yet closed. `close` wakes every waiter; items already buffered
/// stay retrievable.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    capacity: usize,
    state: Mutex<BufferState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedBuffer<T> {
    /// Creates a buffer holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(BufferState {
                items: VecDeque::with_capacity(capacity),
                more: true,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState<T>> {
        self.state.lock().expect("bounded buffer lock poisoned")
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `item`, waiting for space. Fails once the buffer is closed.
    pub fn add(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        while state.more && state.items.len() >= self.capacity {
            state = self
                .not_full
                .wait(state)
                .expect("bounded buffer lock poisoned");
        }
        if !state.more {
            return Err(GraphexError::Execution(
                "cannot add to a closed bounded buffer".to_string(),
            ));
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Takes the oldest item, waiting while the buffer is empty and open.
    ///
    /// Returns `None` only when the buffer is closed and drained.
    pub fn retrieve(&self) -> Option<T> {
        let mut state = self.lock();
        while state.items.is_empty() && state.more {
            state = self
                .not_empty
                .wait(state)
                .expect("bounded buffer lock poisoned");
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Takes the oldest item without waiting.
    pub fn try_retrieve(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Marks end of input and wakes all waiting producers and consumers.
    pub fn close(&self) {
        let mut state = self.lock();
        state.more = false;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Whether items may still come out of the buffer.
    pub fn has_more(&self) -> bool {
        let state = self.lock();
        state.more || !state.items.is_empty()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether no item is buffered right now.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
