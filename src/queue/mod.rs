//! A task queue which runs one task at a time, no faster than a given rate.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bon::Builder;
use tokio::{runtime::Handle, time::Instant};
use tracing::debug;

use crate::{
    error::ConfigError,
    task::{Callbacks, Task, TaskEntry},
};

use schedule::Timer;

mod in_flight;
mod schedule;

/// Runs tasks one at a time, in order, no more than `max_calls_per_second`.
///
/// Tasks are added to the back ([append](Self::append)) or front ([prepend](Self::prepend)) of
/// the queue, and are only run while the queue is started. Stopping the queue keeps any pending
/// tasks, so they resume when it is started again.
///
/// Each task runs synchronously, either on the thread which caused it to become due (e.g. the
/// caller of [start](Self::start)), or on a timer task spawned on the queue's tokio runtime.
/// A slow task holds up every task behind it.
#[derive(Debug)]
pub struct RateLimitedQueue<T, E> {
    max_calls_per_second: f64,
    interval: Duration,
    runtime: Handle,
    state: Mutex<State<T, E>>,
}

/// How to construct a [RateLimitedQueue].
#[derive(Debug, Clone, Builder)]
pub struct Options {
    /// May be fractional, e.g. 0.2 is one call every 5 seconds.
    #[builder(default = 1.0)]
    max_calls_per_second: f64,
    /// The runtime to schedule wake-ups on. Defaults to the current runtime.
    runtime: Option<Handle>,
}

/// A snapshot of the state of a [RateLimitedQueue].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueState {
    pending: usize,
    started: bool,
    in_flight: bool,
    last_execution: Option<Instant>,
    next_wake_up: Option<Instant>,
}

#[derive(Debug)]
struct State<T, E> {
    pending: VecDeque<TaskEntry<T, E>>,
    active: bool,
    /// A task has been popped and is still running, or running its callbacks.
    in_flight: bool,
    /// When the most recent task started.
    last_execution: Option<Instant>,
    timer: Option<Timer>,
    next_timer_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Front,
    Back,
}

impl<T, E> RateLimitedQueue<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a stopped, empty queue on the current tokio runtime.
    pub fn new(max_calls_per_second: f64) -> Result<Arc<Self>, ConfigError> {
        Self::with_options(
            Options::builder()
                .max_calls_per_second(max_calls_per_second)
                .build(),
        )
    }

    /// Create a stopped, empty queue.
    pub fn with_options(options: Options) -> Result<Arc<Self>, ConfigError> {
        let interval = options.interval()?;
        let runtime = match options.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        debug!(
            max_calls_per_second = options.max_calls_per_second,
            ?interval,
            "created queue"
        );

        Ok(Arc::new(Self {
            max_calls_per_second: options.max_calls_per_second,
            interval,
            runtime,
            state: Mutex::new(State {
                pending: VecDeque::new(),
                active: false,
                in_flight: false,
                last_execution: None,
                timer: None,
                next_timer_id: 0,
            }),
        }))
    }

    /// Start running tasks.
    ///
    /// If enough time has passed since the last task ran, the next task runs before this
    /// returns.
    ///
    /// Returns `false` if the queue was already started, in which case nothing changes.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.lock();
            if state.active {
                return false;
            }
            state.active = true;
            debug!(pending = state.pending.len(), "queue started");
        }

        self.schedule();
        true
    }

    /// Add a task to the back of the queue, ignoring its outcome.
    pub fn append(self: &Arc<Self>, task: Task<T, E>) {
        self.append_with(task, Callbacks::new());
    }

    /// Add a task to the back of the queue.
    ///
    /// If the queue is started and enough time has passed since the last task ran, it runs
    /// before this returns.
    pub fn append_with(self: &Arc<Self>, task: Task<T, E>, callbacks: Callbacks<T, E>) {
        self.enqueue(TaskEntry::new(task, callbacks), Position::Back);
    }

    /// Add a task to the front of the queue, ignoring its outcome.
    pub fn prepend(self: &Arc<Self>, task: Task<T, E>) {
        self.prepend_with(task, Callbacks::new());
    }

    /// Add a task to the front of the queue, ahead of every pending task.
    ///
    /// It won't interrupt a task which is already running.
    pub fn prepend_with(self: &Arc<Self>, task: Task<T, E>, callbacks: Callbacks<T, E>) {
        self.enqueue(TaskEntry::new(task, callbacks), Position::Front);
    }

    fn enqueue(self: &Arc<Self>, entry: TaskEntry<T, E>, position: Position) {
        {
            let mut state = self.lock();
            match position {
                Position::Back => state.pending.push_back(entry),
                Position::Front => state.pending.push_front(entry),
            }
        }

        self.schedule();
    }
}

impl<T, E> RateLimitedQueue<T, E> {
    /// Stop running tasks. Pending tasks stay queued.
    ///
    /// A task which is already running is allowed to finish, but nothing runs after it.
    ///
    /// Returns `false` if the queue was already stopped.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        state.active = false;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        debug!(pending = state.pending.len(), "queue stopped");
        true
    }

    /// Remove every pending copy of `task`, returning how many were removed.
    ///
    /// A task which is already running is unaffected.
    pub fn remove(&self, task: &Task<T, E>) -> usize {
        let mut state = self.lock();
        let before = state.pending.len();
        state.pending.retain(|entry| entry.task() != task);
        let removed = before - state.pending.len();

        debug!(?task, removed, "removed task");
        removed
    }

    #[allow(missing_docs)]
    pub fn is_started(&self) -> bool {
        self.lock().active
    }

    #[allow(missing_docs)]
    pub fn is_stopped(&self) -> bool {
        !self.is_started()
    }

    /// Whether there are no pending tasks. A running task doesn't count.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    #[allow(missing_docs)]
    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    /// The number of pending tasks. A running task doesn't count.
    pub fn queue_size(&self) -> usize {
        self.lock().pending.len()
    }

    /// The rate this queue was created with.
    pub fn max_calls_per_second(&self) -> f64 {
        self.max_calls_per_second
    }

    /// The minimum time between the start of one task and the start of the next.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The current state of the queue.
    pub fn state(&self) -> QueueState {
        let state = self.lock();
        QueueState {
            pending: state.pending.len(),
            started: state.active,
            in_flight: state.in_flight,
            last_execution: state.last_execution,
            next_wake_up: state.next_wake_up(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        // User code never runs while this is held.
        self.state.lock().expect("lock should not be poisoned")
    }
}

impl<T, E> Drop for RateLimitedQueue<T, E> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
    }
}

impl Options {
    fn interval(&self) -> Result<Duration, ConfigError> {
        let rate = self.max_calls_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::InvalidRate(rate));
        }

        match Duration::try_from_secs_f64(1.0 / rate) {
            // Deadlines are `Instant`s, so the interval must be addable to one.
            Ok(interval)
                if !interval.is_zero() && Instant::now().checked_add(interval).is_some() =>
            {
                Ok(interval)
            }
            _ => Err(ConfigError::InvalidRate(rate)),
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::builder().build()
    }
}

impl QueueState {
    /// The number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending
    }
    /// Whether the queue is started.
    pub fn started(&self) -> bool {
        self.started
    }
    /// Whether a task is running right now.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
    /// When the most recent task started running.
    pub fn last_execution(&self) -> Option<Instant> {
        self.last_execution
    }
    /// When the next task is due to run, if a wake-up is scheduled.
    pub fn next_wake_up(&self) -> Option<Instant> {
        self.next_wake_up
    }
}
