//! Idle scheduling for debounced writes
//!
//! The store only needs "run this callback after an idle period" and "cancel
//! it". [`TokioScheduler`] does that with spawned sleep tasks;
//! [`ManualScheduler`] keeps a virtual clock that the host advances from its
//! own event loop, which also makes timing tests deterministic.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{Result, StashError};

/// Callback run when an idle timer fires
pub type IdleTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one armed timer
pub trait TimerHandle: Send {
    /// Prevents the timer from firing. Cancelling a fired timer is a no-op.
    fn cancel(&self);
}

/// Schedules callbacks after an idle delay
pub trait IdleScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: IdleTask) -> Box<dyn TimerHandle>;
}

/// Scheduler backed by tokio timers
///
/// Fired tasks run on the blocking pool. Cancelling after the delay has
/// elapsed cannot stop a task that already started.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime of the calling context
    ///
    /// # Returns
    /// * `Ok(TokioScheduler)` when called from within a tokio runtime
    /// * `Err(StashError::NoRuntime)` otherwise
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| StashError::NoRuntime)
    }
}

impl IdleScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: IdleTask) -> Box<dyn TimerHandle> {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // Tasks write files; keep them off the async workers.
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                warn!("Idle task failed: {}", e);
            }
        });
        Box::new(join)
    }
}

impl TimerHandle for JoinHandle<()> {
    fn cancel(&self) {
        self.abort();
    }
}

#[derive(Default)]
struct ManualQueue {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<(Duration, u64), IdleTask>,
}

/// Scheduler driven by an explicit virtual clock
///
/// Nothing fires until [`ManualScheduler::advance`] is called. Timers fire in
/// deadline order, ties broken by scheduling order.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<ManualQueue>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        self.queue.lock().now
    }

    /// Number of timers armed and not yet fired or cancelled
    pub fn pending(&self) -> usize {
        self.queue.lock().timers.len()
    }

    /// Moves the clock forward, running every timer that becomes due
    ///
    /// Timers armed by a running task are honoured if they fall inside the
    /// same window.
    ///
    /// # Returns
    /// The number of tasks that ran
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.queue.lock().now + by;
        let mut fired = 0;

        loop {
            // The lock must be released before the task runs; tasks reschedule.
            let task = {
                let mut queue = self.queue.lock();
                let due = match queue.timers.keys().next() {
                    Some(&key) if key.0 <= target => key,
                    _ => break,
                };
                queue.now = due.0;
                queue.timers.remove(&due)
            };
            if let Some(task) = task {
                task();
                fired += 1;
            }
        }

        self.queue.lock().now = target;
        fired
    }
}

impl IdleScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: IdleTask) -> Box<dyn TimerHandle> {
        let mut queue = self.queue.lock();
        let key = (queue.now + delay, queue.next_id);
        queue.next_id += 1;
        queue.timers.insert(key, task);
        Box::new(ManualTimer {
            key,
            queue: Arc::downgrade(&self.queue),
        })
    }
}

struct ManualTimer {
    key: (Duration, u64),
    queue: Weak<Mutex<ManualQueue>>,
}

impl TimerHandle for ManualTimer {
    fn cancel(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.lock().timers.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> IdleTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_timer_fires_only_after_delay() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let _timer = scheduler.schedule(Duration::from_secs(2), counting_task(&counter));

        assert_eq!(scheduler.advance(Duration::from_millis(1999)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_manual_timer_cancel_prevents_fire() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(Duration::from_secs(1), counting_task(&counter));

        timer.cancel();
        scheduler.advance(Duration::from_secs(5));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.now(), Duration::from_secs(5));
    }

    #[test]
    fn test_manual_timers_fire_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, secs) in [("late", 3), ("early", 1), ("middle", 2)] {
            let order = Arc::clone(&order);
            let _ = scheduler.schedule(
                Duration::from_secs(secs),
                Box::new(move || order.lock().push(label)),
            );
        }

        assert_eq!(scheduler.advance(Duration::from_secs(3)), 3);
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_manual_timer_armed_by_task_runs_in_same_window() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = scheduler.clone();
        let inner_counter = Arc::clone(&counter);
        let _ = scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                let _ = inner_scheduler.schedule(Duration::from_secs(1), counting_task(&inner_counter));
            }),
        );

        assert_eq!(scheduler.advance(Duration::from_secs(2)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tokio_scheduler_requires_runtime() {
        assert!(matches!(TokioScheduler::try_current(), Err(StashError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_fires_after_delay() {
        let scheduler = TokioScheduler::try_current().expect("Runtime should be available");
        let counter = Arc::new(AtomicUsize::new(0));
        let _timer = scheduler.schedule(Duration::from_secs(2), counting_task(&counter));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_cancel_prevents_fire() {
        let scheduler = TokioScheduler::try_current().expect("Runtime should be available");
        let counter = Arc::new(AtomicUsize::new(0));
        let timer = scheduler.schedule(Duration::from_secs(1), counting_task(&counter));

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tokio_task_does_not_block_async_worker() {
        let scheduler = TokioScheduler::try_current().expect("Runtime should be available");
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let received = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&received);
        let _timer = scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                if rx.recv_timeout(Duration::from_secs(5)).is_ok() {
                    flag.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        // The single test worker must stay free to send while the task waits.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).expect("Task should still be waiting");

        for _ in 0..100 {
            if received.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
