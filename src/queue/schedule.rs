//! Deciding when the next task runs, at most one wake-up outstanding per queue.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, trace};

use crate::task::TaskEntry;

use super::{in_flight::InFlight, RateLimitedQueue, State};

/// The pending wake-up.
#[derive(Debug)]
pub(super) struct Timer {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl Timer {
    pub(super) fn cancel(self) {
        trace!(timer = self.id, "cancelling timer");
        self.handle.abort();
    }
}

impl<T, E> RateLimitedQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run or schedule the next task, if there is one and nothing else is already in charge of
    /// doing so.
    pub(super) fn schedule(self: &Arc<Self>) {
        loop {
            let entry = {
                let mut state = self.lock();
                if !state.can_schedule() {
                    return;
                }

                let now = Instant::now();
                let last_execution = state.last_execution;
                match last_execution {
                    Some(last) if now.saturating_duration_since(last) <= self.interval => {
                        // Checked against `Instant` range when the queue was created.
                        if let Some(deadline) = last.checked_add(self.interval) {
                            self.arm_timer(&mut state, deadline);
                        }
                        return;
                    }
                    // Nothing has run yet, or the window has already passed: catch up now.
                    _ => match state.begin_next(now) {
                        Some(entry) => entry,
                        None => return,
                    },
                }
            };

            self.execute(entry);
        }
    }

    /// Called when timer `id` wakes up.
    fn fire(self: &Arc<Self>, id: u64) {
        let entry = {
            let mut state = self.lock();
            // Cancelled or replaced while waking up.
            if state.timer.as_ref().map(|timer| timer.id) != Some(id) {
                return;
            }
            state.timer = None;

            if !state.active || state.in_flight {
                return;
            }
            state.begin_next(Instant::now())
        };

        if let Some(entry) = entry {
            self.execute(entry);
        }
        self.schedule();
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State<T, E>, deadline: Instant) {
        let id = state.next_timer_id;
        state.next_timer_id = state.next_timer_id.wrapping_add(1);

        let queue = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(queue) = queue.upgrade() {
                queue.fire(id);
            }
        });

        debug!(
            timer = id,
            wait = ?deadline.saturating_duration_since(Instant::now()),
            pending = state.pending.len(),
            "armed timer"
        );
        state.timer = Some(Timer {
            id,
            deadline,
            handle,
        });
    }

    /// Runs on the current thread, without holding the lock.
    ///
    /// A panicking task (or callback) is contained here, so the queue carries on with the next
    /// task.
    fn execute(&self, entry: TaskEntry<T, E>) {
        let _in_flight = InFlight::new(self);

        let task = entry.task().clone();
        match panic::catch_unwind(AssertUnwindSafe(|| entry.execute())) {
            Ok(succeeded) => trace!(?task, succeeded, "executed task"),
            Err(_) => error!(?task, "task panicked"),
        }
    }
}

impl<T, E> State<T, E> {
    fn can_schedule(&self) -> bool {
        self.active && !self.in_flight && self.timer.is_none() && !self.pending.is_empty()
    }

    /// Pop the next task and mark it as executing from `now`.
    fn begin_next(&mut self, now: Instant) -> Option<TaskEntry<T, E>> {
        let entry = self.pending.pop_front()?;
        self.last_execution = Some(now);
        self.in_flight = true;
        Some(entry)
    }

    pub(super) fn next_wake_up(&self) -> Option<Instant> {
        self.timer.as_ref().map(|timer| timer.deadline)
    }
}
