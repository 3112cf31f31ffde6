//! Thread-safe bounded message ports.
//!
//! A [`MsgPort`] is a fixed-capacity FIFO connecting caller threads to the
//! audio worker. Pushing blocks while the port is full and popping blocks
//! while it is empty; [`MsgPort::pop_deadline`] bounds the wait so the worker
//! can fall through to a mix tick when no command arrives within one update
//! period.
//!
//! The engine uses one producer (the caller) and one consumer (the worker)
//! per direction, but nothing here requires that; any number of threads may
//! share a port.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Result of a deadline-bounded pop.
#[derive(Debug)]
pub enum PopResult<T> {
    /// A message was dequeued before the deadline.
    Message(T),
    /// The deadline passed with the port still empty.
    TimedOut,
}

/// Bounded FIFO message port.
#[derive(Debug)]
pub struct MsgPort<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    reader: Condvar,
    writer: Condvar,
}

/// A poisoned port mutex means a holder panicked mid-operation; the queue
/// itself is still structurally sound, so keep going with the data we have.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> MsgPort<T> {
    /// Create a port holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            reader: Condvar::new(),
            writer: Condvar::new(),
        }
    }

    /// Append a message, blocking while the port is full.
    pub fn push(&self, msg: T) {
        let mut queue = lock(&self.queue);
        while queue.len() >= self.capacity {
            queue = self
                .writer
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        queue.push_back(msg);
        drop(queue);
        self.reader.notify_one();
    }

    /// Dequeue the oldest message, blocking while the port is empty.
    pub fn pop(&self) -> T {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(msg) = queue.pop_front() {
                drop(queue);
                self.writer.notify_one();
                return msg;
            }
            queue = self
                .reader
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Dequeue the oldest message, waiting no later than `deadline`.
    pub fn pop_deadline(&self, deadline: Instant) -> PopResult<T> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(msg) = queue.pop_front() {
                drop(queue);
                self.writer.notify_one();
                return PopResult::Message(msg);
            }
            let now = Instant::now();
            if now >= deadline {
                return PopResult::TimedOut;
            }
            let (guard, _) = self
                .reader
                .wait_timeout(queue, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
        }
    }

    /// Dequeue the oldest message without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let msg = lock(&self.queue).pop_front();
        if msg.is_some() {
            self.writer.notify_one();
        }
        msg
    }

    /// Number of messages currently queued.
    ///
    /// Only a snapshot; used for drain heuristics, never for correctness.
    pub fn used(&self) -> usize {
        lock(&self.queue).len()
    }
}
