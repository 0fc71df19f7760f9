//! Cooperative tick scheduler.
//!
//! One loop drives every periodic job in the engine: synchronization, DB
//! flush, cache cleanup, domain sweeps. Tasks declare a period and a
//! priority; each tick the scheduler runs the tasks whose period has
//! elapsed, in priority order, one at a time. A running task is locked so a
//! slow run (a long DB flush, say) can never overlap the next one. Task
//! errors are logged and contained; the loop itself never stops on them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Future returned by one task invocation.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A periodic job. Receives the time elapsed since its previous run.
pub type TaskFn = Box<dyn FnMut(Duration) -> TaskFuture + Send>;

/// Identifies a registered task for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Task {
    id: TaskId,
    name: &'static str,
    run: TaskFn,
    period: Duration,
    /// Lower runs first when several tasks are due in the same tick.
    priority: i32,
    last_run: Instant,
    /// The non-reentrancy lock: set while the task's future is in flight.
    locked: bool,
}

/// Cooperative scheduler driving all periodic engine work.
///
/// Construct one at application start and pass it to the components that
/// register work; there is no global instance.
pub struct Scheduler {
    tasks: Mutex<Vec<Option<Task>>>,
    tick: Duration,
    next_id: AtomicU64,
}

impl Scheduler {
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            tick,
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a task to run every `period`, starting one period from now.
    ///
    /// Tasks may be added from inside another task: the slot vector is only
    /// locked between invocations, never across an await.
    pub fn add_task(
        &self,
        name: &'static str,
        period: Duration,
        priority: i32,
        run: TaskFn,
    ) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().push(Some(Task {
            id,
            name,
            run,
            period,
            priority,
            last_run: Instant::now(),
            locked: false,
        }));
        id
    }

    /// Removes a task. A removal during the task's own run takes effect
    /// after the in-flight invocation completes.
    pub fn remove_task(&self, id: TaskId) {
        let mut tasks = self.tasks.lock();
        for slot in tasks.iter_mut() {
            if slot.as_ref().is_some_and(|t| t.id == id) {
                // An in-flight invocation already extracted its future and
                // completes normally; only future runs are suppressed.
                *slot = None;
            }
        }
        tasks.retain(Option::is_some);
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().iter().flatten().count()
    }

    /// Runs the loop until `shutdown` resolves. In-flight tasks finish;
    /// future ticks are suppressed. No queues are drained.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            self.run_due(Instant::now()).await;
        }
        debug!("scheduler stopped");
    }

    /// Runs every due task once, in priority order. Public so tests (and
    /// the engine's final-flush path) can drive ticks manually.
    pub async fn run_due(&self, now: Instant) {
        // Phase 1: pick due tasks and lock them.
        let mut due: Vec<(TaskId, &'static str, Duration)> = {
            let mut tasks = self.tasks.lock();
            let mut due = Vec::new();
            for task in tasks.iter_mut().flatten() {
                if task.locked {
                    continue;
                }
                let delta = now.saturating_duration_since(task.last_run);
                if delta >= task.period {
                    task.locked = true;
                    due.push((task.id, task.name, delta, task.priority));
                }
            }
            due.sort_by_key(|&(_, _, _, priority)| priority);
            due.into_iter().map(|(id, name, delta, _)| (id, name, delta)).collect()
        };

        // Phase 2: run them sequentially without holding the slot lock.
        for (id, name, delta) in due.drain(..) {
            let fut = {
                let mut tasks = self.tasks.lock();
                tasks
                    .iter_mut()
                    .flatten()
                    .find(|t| t.id == id)
                    .map(|task| (task.run)(delta))
            };
            let Some(fut) = fut else {
                // Removed while due; nothing to unlock.
                continue;
            };
            if let Err(err) = fut.await {
                error!(task = name, error = %err, "scheduled task failed");
            }
            let mut tasks = self.tasks.lock();
            if let Some(task) = tasks.iter_mut().flatten().find(|t| t.id == id) {
                task.last_run = Instant::now();
                task.locked = false;
            }
        }
    }
}
