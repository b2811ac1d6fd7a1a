//! Execute queue: the barrier the build waits on before snapshotting a page.
//!
//! A task-counting join. Scheduling registers a task, completion removes it,
//! and [`ExecuteQueue::drain`] re-checks emptiness after every wake-up, so
//! tasks scheduled while earlier ones finish keep the drain waiting.
//!
//! Faults raised by sandboxed work (failed cells, forbidden URLs) are parked
//! here as well so the driver can surface them as typed errors after the
//! sandbox settles.

use crate::error::Error;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

impl TaskId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TaskId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Default)]
struct State {
    next_id: u32,
    in_flight: BTreeSet<TaskId>,
    fault: Option<Error>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    idle: Notify,
}

/// Shared registry of in-flight cell-execution tasks.
///
/// Cheap to clone; all clones observe the same queue.
#[derive(Clone, Default)]
pub struct ExecuteQueue {
    inner: Arc<Inner>,
}

impl ExecuteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new in-flight task.
    pub fn schedule(&self) -> TaskId {
        let mut state = self.state();
        state.next_id = state.next_id.wrapping_add(1);
        let id = TaskId(state.next_id);
        state.in_flight.insert(id);
        tracing::debug!(task = %id, pending = state.in_flight.len(), "task scheduled");
        id
    }

    /// Mark a task finished. Returns false if the task was not in flight.
    pub fn complete(&self, id: TaskId) -> bool {
        let mut state = self.state();
        if !state.in_flight.remove(&id) {
            tracing::warn!(task = %id, "completing a task that is not in flight");
            return false;
        }
        let pending = state.in_flight.len();
        drop(state);

        tracing::debug!(task = %id, pending, "task completed");
        if pending == 0 {
            self.inner.idle.notify_waiters();
        }
        true
    }

    /// Mark a task finished with an error. The first fault is kept.
    pub fn fail(&self, id: TaskId, message: impl Into<String>) -> bool {
        self.record_fault(Error::CellFailed {
            task: id.get(),
            message: message.into(),
        });
        self.complete(id)
    }

    /// Park an error for the driver. Later faults are logged and dropped.
    pub fn record_fault(&self, fault: Error) {
        let mut state = self.state();
        if state.fault.is_some() {
            tracing::warn!(error = %fault, "additional sandbox fault");
            return;
        }
        tracing::debug!(error = %fault, "sandbox fault recorded");
        state.fault = Some(fault);
    }

    pub fn take_fault(&self) -> Option<Error> {
        self.state().fault.take()
    }

    /// Forget every in-flight task and parked fault.
    ///
    /// Called before each page so work orphaned by an aborted render cannot
    /// hold up the next drain. Task ids keep counting up, so a late completion
    /// of a forgotten task is reported as unknown rather than settling a new one.
    pub fn reset(&self) {
        let mut state = self.state();
        let orphaned = std::mem::take(&mut state.in_flight);
        let fault = state.fault.take();
        drop(state);

        if !orphaned.is_empty() {
            tracing::warn!(tasks = orphaned.len(), "discarding orphaned tasks");
        }
        if let Some(fault) = fault {
            tracing::warn!(error = %fault, "discarding stale sandbox fault");
        }
        self.inner.idle.notify_waiters();
    }

    pub fn pending(&self) -> usize {
        self.state().in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Resolve once no task is in flight.
    ///
    /// Returns immediately on an empty queue. Never times out: a task that is
    /// never completed keeps this pending forever.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not lost.
            notified.as_mut().enable();

            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_on_empty_queue_is_immediate_and_idempotent() {
        let queue = ExecuteQueue::new();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_millis(100), queue.drain())
                .await
                .expect("drain of an empty queue must not wait");
        }
        assert!(queue.is_empty());
        assert!(queue.take_fault().is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_all_tasks() {
        let queue = ExecuteQueue::new();
        let a = queue.schedule();
        let b = queue.schedule();
        assert_eq!(queue.pending(), 2);

        let q = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            q.complete(a);
            tokio::time::sleep(Duration::from_millis(10)).await;
            q.complete(b);
        });

        queue.drain().await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_scheduled_on_completion_keeps_drain_waiting() {
        let queue = ExecuteQueue::new();
        let finished = Arc::new(AtomicBool::new(false));
        let a = queue.schedule();

        let q = queue.clone();
        let done = finished.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            // A completes; its completion side effect enqueues B in the same turn.
            q.complete(a);
            let b = q.schedule();
            let q2 = q.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.store(true, Ordering::SeqCst);
                q2.complete(b);
            });
        });

        queue.drain().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_never_settles_while_task_outstanding() {
        let queue = ExecuteQueue::new();
        let _stuck = queue.schedule();

        let waited = tokio::time::timeout(Duration::from_millis(50), queue.drain()).await;
        assert!(waited.is_err());
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_complete_unknown_task() {
        let queue = ExecuteQueue::new();
        let id = queue.schedule();
        assert!(queue.complete(id));
        assert!(!queue.complete(id));
        assert!(!queue.complete(TaskId::from(99)));
    }

    #[test]
    fn test_first_fault_wins() {
        let queue = ExecuteQueue::new();
        let id = queue.schedule();
        assert!(queue.fail(id, "boom"));
        queue.record_fault(Error::UnsupportedUrl("http://x".into()));

        assert!(queue.is_empty());
        match queue.take_fault() {
            Some(Error::CellFailed { task, message }) => {
                assert_eq!(task, id.get());
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected fault: {other:?}"),
        }
        assert!(queue.take_fault().is_none());
    }

    #[tokio::test]
    async fn test_reset_forgets_orphaned_tasks_and_faults() {
        let queue = ExecuteQueue::new();
        let orphan = queue.schedule();
        queue.record_fault(Error::Script("aborted".into()));

        queue.reset();
        assert!(queue.is_empty());
        assert!(queue.take_fault().is_none());
        tokio::time::timeout(Duration::from_millis(100), queue.drain())
            .await
            .expect("drain after reset must not wait on orphaned tasks");

        let fresh = queue.schedule();
        assert_ne!(fresh, orphan);
        assert!(!queue.complete(orphan));
        assert_eq!(queue.pending(), 1);
        assert!(queue.complete(fresh));
    }
}
