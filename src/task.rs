//! Units of work, and what to do with their results.

use std::{fmt, sync::Arc};

type TaskFn<T, E> = dyn Fn() -> Result<T, E> + Send + Sync;

/// A zero-argument unit of work, producing a result or failing with an error.
///
/// Cheaply cloneable. Clones share an identity: two tasks are equal if they were cloned from
/// the same [Task::new] call, regardless of what they do. This is what
/// [RateLimitedQueue::remove](crate::queue::RateLimitedQueue::remove) matches on.
pub struct Task<T, E> {
    run: Arc<TaskFn<T, E>>,
}

/// Optional handlers for the outcome of a task.
///
/// Whichever handler is not set does nothing.
pub struct Callbacks<T, E> {
    on_success: Box<dyn FnOnce(T) + Send>,
    on_error: Box<dyn FnOnce(E) + Send>,
}

/// A task waiting in the queue, along with its callbacks.
pub(crate) struct TaskEntry<T, E> {
    task: Task<T, E>,
    callbacks: Callbacks<T, E>,
}

impl<T, E> Task<T, E> {
    #[allow(missing_docs)]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self { run: Arc::new(f) }
    }

    /// Whether both tasks are the same task, rather than just doing the same thing.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.run, &other.run)
    }

    pub(crate) fn run(&self) -> Result<T, E> {
        (self.run)()
    }
}

impl<T, E> Clone for Task<T, E> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<T, E> PartialEq for Task<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T, E> Eq for Task<T, E> {}

impl<T, E> fmt::Debug for Task<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &Arc::as_ptr(&self.run).cast::<()>())
            .finish()
    }
}

impl<T: 'static, E: 'static> Callbacks<T, E> {
    /// Callbacks which ignore the outcome.
    pub fn new() -> Self {
        Self {
            on_success: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        }
    }

    /// Called with the task's result if it succeeds.
    pub fn on_success(mut self, f: impl FnOnce(T) + Send + 'static) -> Self {
        self.on_success = Box::new(f);
        self
    }

    /// Called with the task's error if it fails.
    pub fn on_error(mut self, f: impl FnOnce(E) + Send + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

impl<T: 'static, E: 'static> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Callbacks<T, E> {
    fn dispatch(self, result: Result<T, E>) {
        match result {
            Ok(value) => (self.on_success)(value),
            Err(error) => (self.on_error)(error),
        }
    }
}

impl<T, E> fmt::Debug for Callbacks<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

impl<T, E> TaskEntry<T, E> {
    pub(crate) fn new(task: Task<T, E>, callbacks: Callbacks<T, E>) -> Self {
        Self { task, callbacks }
    }

    pub(crate) fn task(&self) -> &Task<T, E> {
        &self.task
    }

    /// Run the task, then hand its outcome to the matching callback.
    ///
    /// Returns whether the task succeeded.
    pub(crate) fn execute(self) -> bool {
        let result = self.task.run();
        let succeeded = result.is_ok();
        self.callbacks.dispatch(result);
        succeeded
    }
}

impl<T, E> fmt::Debug for TaskEntry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{
        mock::{Event, Recorder},
        Callbacks, Task, TaskEntry,
    };

    #[test]
    fn clones_are_the_same_task() {
        let task = Task::<(), ()>::new(|| Ok(()));
        let same = task.clone();
        let lookalike = Task::<(), ()>::new(|| Ok(()));

        assert_eq!(task, same);
        assert_ne!(task, lookalike);
    }

    #[test]
    fn success_goes_to_on_success() {
        let recorder = Recorder::default();
        let entry = TaskEntry::new(recorder.task(7), recorder.callbacks(7));

        assert!(entry.execute());

        assert_eq!(
            &recorder.events()[1..],
            &[Event::Succeeded { id: 7, value: 7 }]
        );
    }

    #[test]
    fn error_goes_to_on_error() {
        let recorder = Recorder::default();
        let entry = TaskEntry::new(recorder.failing_task(3, "nope"), recorder.callbacks(3));

        assert!(!entry.execute());

        assert_eq!(
            &recorder.events()[1..],
            &[Event::Failed {
                id: 3,
                error: "nope".to_string()
            }]
        );
    }

    #[test]
    fn missing_callbacks_do_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Task::<(), &str>::new({
            let runs = Arc::clone(&runs);
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Err("ignored")
            }
        });

        TaskEntry::new(task.clone(), Callbacks::default()).execute();
        TaskEntry::new(task, Callbacks::new().on_success(|_| panic!("not a success"))).execute();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
