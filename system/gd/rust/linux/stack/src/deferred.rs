//! Ordered queue of messages a state machine could not handle in its current state.
//!
//! A machine defers a message by pushing it here. Whenever the machine changes state it takes
//! the whole queue and re-submits every message, oldest first, before it looks at anything new.
//! Messages that still cannot be handled are simply deferred again and keep their relative
//! order.

use std::collections::VecDeque;

pub struct DeferredQueue<M> {
    queue: VecDeque<M>,
}

impl<M> DeferredQueue<M> {
    pub fn new() -> Self {
        DeferredQueue { queue: VecDeque::new() }
    }

    /// Appends a message behind every message already deferred.
    pub fn defer(&mut self, message: M) {
        self.queue.push_back(message);
    }

    /// Removes and returns all deferred messages in arrival order.
    pub fn take_all(&mut self) -> Vec<M> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Iterates over deferred messages without removing them.
    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.queue.iter()
    }
}
