//! Event Loop Implementation
//!
//! This module provides the FIFO task queue that decouples "a promise settled"
//! from "a handler ran". Promises never call handlers directly; they hand a
//! zero-argument task to a [`Scheduler`], and the host drains the queue.
//!
//! [`EventLoop`] is the provided scheduler. It is a cheap clonable handle, so
//! tasks may enqueue further tasks while the queue is being drained.

use crate::error::Error;
use crate::promise::{Deferred, IntoResolution, Promise, Reason, Resolver, Value};
use crate::unhandled::{report_unhandled, RejectionOrigin, UnhandledRejection};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// A deferred callback waiting in the queue
pub type Task = Box<dyn FnOnce()>;

/// Anything that can accept tasks for later, in-order execution
///
/// Implementations must run tasks in FIFO order, one at a time, and never
/// from within the `schedule` call itself.
pub trait Scheduler {
    /// Append a task to the queue
    fn schedule(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

/// Share a scheduler handle with the promises built on top of it
pub(crate) fn shared<S: Scheduler + Clone + 'static>(scheduler: &S) -> Rc<dyn Scheduler> {
    Rc::new(scheduler.clone())
}

/// Default number of tasks drained per tick
pub const DEFAULT_TASK_BUDGET: usize = 10_000;

/// Event loop configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Maximum number of tasks drained per tick (starvation protection)
    pub task_budget: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            task_budget: DEFAULT_TASK_BUDGET,
        }
    }
}

/// Result of running the event loop to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Total number of tasks that were dequeued and processed
    pub tasks_processed: usize,
    /// Number of budget-limited drain passes
    pub iterations: usize,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventLoopStats {
    /// Total tasks processed across all ticks
    pub total_tasks: u64,
    /// Total number of drain passes
    pub total_ticks: u64,
    /// Maximum tasks drained in a single tick
    pub max_tasks_per_tick: u64,
    /// Tasks that panicked and were reported as unhandled
    pub panicked_tasks: u64,
}

struct Inner {
    queue: RefCell<VecDeque<Task>>,
    task_budget: Cell<usize>,
    stats: RefCell<EventLoopStats>,
}

/// The event loop owns the task queue and drives it
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<Inner>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending_tasks", &self.pending_tasks())
            .field("task_budget", &self.task_budget())
            .finish()
    }
}

impl Scheduler for EventLoop {
    fn schedule(&self, task: Task) {
        self.inner.queue.borrow_mut().push_back(task);
    }
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    /// Create a new event loop from configuration
    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                queue: RefCell::new(VecDeque::new()),
                task_budget: Cell::new(config.task_budget.max(1)),
                stats: RefCell::new(EventLoopStats::default()),
            }),
        }
    }

    /// Enqueue a task
    pub fn queue_task(&self, task: impl FnOnce() + 'static) {
        self.schedule(Box::new(task));
    }

    /// Number of tasks waiting in the queue
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Check if there are pending tasks
    pub fn has_pending_tasks(&self) -> bool {
        !self.inner.queue.borrow().is_empty()
    }

    /// Drop all queued tasks without running them
    pub fn clear(&self) {
        // Take first: dropping tasks may drop promises that schedule more work.
        let dropped = std::mem::take(&mut *self.inner.queue.borrow_mut());
        drop(dropped);
    }

    /// Run the oldest queued task as a tick of its own.
    /// Returns `false` if the queue was empty.
    pub fn tick(&self) -> bool {
        let next = self.inner.queue.borrow_mut().pop_front();
        match next {
            Some(task) => {
                self.run_task(task);
                let mut stats = self.inner.stats.borrow_mut();
                stats.total_tasks += 1;
                stats.total_ticks += 1;
                stats.max_tasks_per_tick = stats.max_tasks_per_tick.max(1);
                true
            }
            None => false,
        }
    }

    /// Drain tasks from the queue up to the budget limit.
    /// Returns the number of tasks processed and the number still queued.
    pub fn drain_tasks(&self) -> (usize, usize) {
        let budget = self.task_budget();
        let mut count: usize = 0;

        while count < budget {
            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(task) = next else { break };
            self.run_task(task);
            count += 1;
        }

        let mut stats = self.inner.stats.borrow_mut();
        stats.total_tasks += count as u64;
        stats.total_ticks += 1;
        if (count as u64) > stats.max_tasks_per_tick {
            stats.max_tasks_per_tick = count as u64;
        }
        drop(stats);

        let remaining = self.pending_tasks();
        tracing::trace!(processed = count, remaining, "drained task queue");
        (count, remaining)
    }

    /// Run the event loop until the queue is empty, including tasks that
    /// were enqueued while draining.
    ///
    /// Returns a `RunResult` with statistics about what was processed.
    pub fn run_to_completion(&self) -> RunResult {
        let mut result = RunResult::default();

        while self.has_pending_tasks() {
            let (processed, _remaining) = self.drain_tasks();
            result.tasks_processed += processed;
            result.iterations += 1;
        }

        result
    }

    /// Set the maximum number of tasks to drain per tick (starvation protection).
    pub fn set_task_budget(&self, limit: usize) {
        self.inner.task_budget.set(limit.max(1));
    }

    /// Get the current task budget limit.
    pub fn task_budget(&self) -> usize {
        self.inner.task_budget.get()
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.inner.stats.borrow().clone()
    }

    /// Reset all event loop statistics to zero.
    pub fn reset_stats(&self) {
        *self.inner.stats.borrow_mut() = EventLoopStats::default();
    }

    /// Create a deferred whose promise delivers through this loop
    pub fn deferred<T: Value, E: Reason>(&self) -> Deferred<T, E> {
        Deferred::new(self)
    }

    /// Create a cancellable deferred whose promise delivers through this loop
    pub fn deferred_with_canceller<T, E, C>(&self, canceller: C) -> Deferred<T, E>
    where
        T: Value,
        E: Reason,
        C: FnOnce(Resolver<T, E>) -> Result<(), E> + 'static,
    {
        Deferred::with_canceller(self, canceller)
    }

    /// Create a promise from a value, a `Result` or another promise
    pub fn resolve<T, E, R>(&self, resolution: R) -> Promise<T, E>
    where
        T: Value,
        E: Reason,
        R: IntoResolution<T, E>,
    {
        crate::promise::resolve(self, resolution)
    }

    /// Create a rejected promise
    pub fn reject<T: Value, E: Reason>(&self, reason: E) -> Promise<T, E> {
        crate::promise::reject(self, reason)
    }

    fn run_task(&self, task: Task) {
        // Promise callbacks catch their own panics; only raw host tasks
        // unwind this far.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
            self.inner.stats.borrow_mut().panicked_tasks += 1;
            let reason = Error::from_panic(payload);
            report_unhandled(UnhandledRejection::new(reason.to_string(), RejectionOrigin::Task));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unhandled::{set_unhandled_rejection_hook, take_unhandled_rejection_hook};

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert!(!el.has_pending_tasks());
        assert_eq!(el.task_budget(), DEFAULT_TASK_BUDGET);
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let el = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            el.queue_task(move || log.borrow_mut().push(i));
        }
        assert_eq!(el.pending_tasks(), 3);
        assert!(log.borrow().is_empty());

        el.run_to_completion();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_tasks_enqueued_while_draining_run_last() {
        let el = EventLoop::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_log = log.clone();
        let handle = el.clone();
        el.queue_task(move || {
            inner_log.borrow_mut().push("outer");
            let nested_log = inner_log.clone();
            handle.queue_task(move || nested_log.borrow_mut().push("nested"));
        });
        let tail_log = log.clone();
        el.queue_task(move || tail_log.borrow_mut().push("tail"));

        let result = el.run_to_completion();
        assert_eq!(*log.borrow(), vec!["outer", "tail", "nested"]);
        assert_eq!(result.tasks_processed, 3);
    }

    #[test]
    fn test_tick_single_steps() {
        let el = EventLoop::new();
        let count = Rc::new(Cell::new(0));
        for _ in 0..2 {
            let count = count.clone();
            el.queue_task(move || count.set(count.get() + 1));
        }

        assert!(el.tick());
        assert_eq!(count.get(), 1);
        assert!(el.tick());
        assert_eq!(count.get(), 2);
        assert!(!el.tick());

        let stats = el.stats();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.total_ticks, 2);
        assert_eq!(stats.max_tasks_per_tick, 1);
    }

    #[test]
    fn test_budget_limits_single_drain() {
        let el = EventLoop::with_config(EventLoopConfig { task_budget: 2 });
        for _ in 0..5 {
            el.queue_task(|| {});
        }

        assert_eq!(el.drain_tasks(), (2, 3));
        let result = el.run_to_completion();
        assert_eq!(result.tasks_processed, 3);
        assert_eq!(result.iterations, 2);

        let stats = el.stats();
        assert_eq!(stats.total_tasks, 5);
        assert_eq!(stats.max_tasks_per_tick, 2);
    }

    #[test]
    fn test_zero_budget_is_normalized() {
        let el = EventLoop::with_config(EventLoopConfig { task_budget: 0 });
        assert_eq!(el.task_budget(), 1);
        el.set_task_budget(0);
        assert_eq!(el.task_budget(), 1);
    }

    #[test]
    fn test_panicking_task_is_reported_and_drain_continues() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        set_unhandled_rejection_hook(move |report| sink.borrow_mut().push(report.clone()));

        let el = EventLoop::new();
        let ran = Rc::new(Cell::new(false));
        el.queue_task(|| panic!("task exploded"));
        let flag = ran.clone();
        el.queue_task(move || flag.set(true));
        el.run_to_completion();
        take_unhandled_rejection_hook();

        assert!(ran.get());
        assert_eq!(el.stats().panicked_tasks, 1);
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].origin, RejectionOrigin::Task);
        assert_eq!(seen[0].reason, "Panic: task exploded");
    }

    #[test]
    fn test_clear_and_reset_stats() {
        let el = EventLoop::new();
        el.queue_task(|| {});
        el.tick();
        el.queue_task(|| {});
        el.clear();
        assert!(!el.has_pending_tasks());

        assert_eq!(el.stats().total_tasks, 1);
        el.reset_stats();
        assert_eq!(el.stats(), EventLoopStats::default());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EventLoopConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EventLoopConfig::default());

        let config: EventLoopConfig = serde_json::from_str(r#"{"task_budget": 64}"#).unwrap();
        assert_eq!(config.task_budget, 64);
    }
}
