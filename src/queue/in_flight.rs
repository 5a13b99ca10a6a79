use std::sync::PoisonError;

use super::RateLimitedQueue;

/// Marks a task as executing, for as long as the guard is alive.
#[derive(Debug)]
pub(super) struct InFlight<'a, T, E> {
    queue: &'a RateLimitedQueue<T, E>,
}

impl<'a, T, E> InFlight<'a, T, E> {
    /// The caller must already have set the in-flight flag, under the same lock which popped
    /// the task.
    pub(super) fn new(queue: &'a RateLimitedQueue<T, E>) -> Self {
        Self { queue }
    }
}

impl<T, E> Drop for InFlight<'_, T, E> {
    fn drop(&mut self) {
        self.queue
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}
