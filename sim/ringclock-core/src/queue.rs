//! Provides the buffer between a machine's read loops and its event loop.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A FIFO of received payloads.
///
/// Both read loops of a machine push onto the queue and the event loop pops
/// from it, one message per iteration.
#[derive(Debug, Default)]
pub struct InboundQueue {
    queue: Mutex<VecDeque<String>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a payload to the back of the queue.
    pub fn push(&self, message: impl Into<String>) {
        self.lock().push_back(message.into());
    }

    /// Removes the oldest payload, if any.
    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    /// Removes the oldest payload and reports how many remain after it.
    pub fn pop_with_len(&self) -> Option<(String, usize)> {
        let mut queue = self.lock();
        let message = queue.pop_front()?;
        Some((message, queue.len()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
