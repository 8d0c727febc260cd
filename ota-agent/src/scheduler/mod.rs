//! Time-triggered task scheduler.
//!
//! A background loop wakes every poll interval and spawns each due task on
//! its own tokio task. Runs are not serialised against each other, but a
//! task whose previous run is still in flight is skipped. A failing or
//! panicking task is logged and re-stamped like a successful one.

pub mod task;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::errors::Result;
pub use task::{Schedule, Task, TaskInfo, TaskKind};

/// Executes fired tasks. Implemented by the orchestrator.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn run_task(&self, name: &str, kind: &TaskKind) -> Result<()>;
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskScheduler {
    tasks: Mutex<HashMap<String, Task>>,
    in_flight: Mutex<HashSet<String>>,
    poll_interval: Duration,
    error_backoff: Duration,
    runner: Mutex<Option<Runner>>,
    /// Upcoming `tick` passes that fail, for exercising the loop's backoff
    #[cfg(test)]
    tick_faults: std::sync::atomic::AtomicUsize,
}

impl TaskScheduler {
    pub fn new(poll_interval: Duration, error_backoff: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            poll_interval,
            error_backoff,
            runner: Mutex::new(None),
            #[cfg(test)]
            tick_faults: Default::default(),
        }
    }

    /// Insert a task; an existing task with the same name is replaced.
    pub fn add_task(&self, task: Task) {
        info!(task = %task.name, schedule = %task.schedule, next = %task.next_execution, "Added task");
        self.tasks.lock().insert(task.name.clone(), task);
    }

    pub fn remove_task(&self, name: &str) -> bool {
        let removed = self.tasks.lock().remove(name).is_some();
        if removed {
            info!(task = %name, "Removed task");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Task> {
        self.tasks.lock().get(name).cloned()
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.lock().contains(name)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.lock().is_empty()
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self.tasks.lock().values().map(Task::info).collect();
        infos.sort_by(|a, b| a.next_execution.cmp(&b.next_execution).then(a.name.cmp(&b.name)));
        infos
    }

    /// Earliest pending install, if any.
    pub fn next_update_time(&self) -> Option<NaiveDateTime> {
        self.tasks
            .lock()
            .values()
            .filter(|t| matches!(t.kind, TaskKind::ScheduledInstall { .. }))
            .map(|t| t.next_execution)
            .min()
    }

    /// Drop every install task that has not started. Returns the removed names.
    pub fn remove_pending_installs(&self) -> Vec<String> {
        let in_flight = self.in_flight.lock().clone();
        let mut tasks = self.tasks.lock();
        let names: Vec<String> = tasks
            .values()
            .filter(|t| matches!(t.kind, TaskKind::ScheduledInstall { .. }))
            .filter(|t| !in_flight.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        for name in &names {
            tasks.remove(name);
            info!(task = %name, "Cancelled pending install");
        }
        names
    }

    /// Spawn every task due at `now`. Returns the names that were launched.
    pub fn tick(self: &Arc<Self>, handler: &Arc<dyn TaskHandler>, now: NaiveDateTime) -> Vec<String> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            let take_fault = self
                .tick_faults
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if take_fault {
                panic!("scheduler pass failed");
            }
        }

        let due: Vec<(String, TaskKind)> = {
            let tasks = self.tasks.lock();
            let mut in_flight = self.in_flight.lock();
            let mut due = Vec::new();
            for task in tasks.values().filter(|t| t.is_due(now)) {
                if in_flight.contains(&task.name) {
                    debug!(task = %task.name, "Skipping trigger: previous run still in flight");
                    continue;
                }
                in_flight.insert(task.name.clone());
                due.push((task.name.clone(), task.kind.clone()));
            }
            due
        };

        let mut launched = Vec::with_capacity(due.len());
        for (name, kind) in due {
            let scheduler = Arc::clone(self);
            let handler = Arc::clone(handler);
            launched.push(name.clone());
            tokio::spawn(async move {
                scheduler.execute(handler, name, kind).await;
            });
        }
        launched
    }

    async fn execute(&self, handler: Arc<dyn TaskHandler>, name: String, kind: TaskKind) {
        debug!(task = %name, "Executing task");
        let outcome = AssertUnwindSafe(handler.run_task(&name, &kind))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => debug!(task = %name, "Task executed successfully"),
            Ok(Err(e)) => error!(task = %name, error = %e, "Task failed"),
            Err(_) => error!(task = %name, "Task panicked"),
        }

        let now = chrono::Local::now().naive_local();
        if let Some(task) = self.tasks.lock().get_mut(&name) {
            task.mark_executed(now);
        }
        self.in_flight.lock().remove(&name);
    }

    /// Start the polling loop. Calling it while already running is a no-op.
    pub fn start(self: &Arc<Self>, handler: Arc<dyn TaskHandler>) {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            warn!("Task scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(handler, token).await;
        });

        *runner = Some(Runner { cancel, handle });
        info!("Task scheduler started");
    }

    async fn run_loop(self: Arc<Self>, handler: Arc<dyn TaskHandler>, cancel: CancellationToken) {
        loop {
            let now = chrono::Local::now().naive_local();
            let pass = std::panic::catch_unwind(AssertUnwindSafe(|| self.tick(&handler, now)));

            let sleep_for = match pass {
                Ok(_) => self.poll_interval,
                Err(_) => {
                    error!("Error in scheduler loop; backing off {:?}", self.error_backoff);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        debug!("Scheduler loop exited");
    }

    /// Stop the polling loop. In-flight task runs are left to finish.
    pub async fn stop(&self) {
        let runner = self.runner.lock().take();
        if let Some(Runner { cancel, handle }) = runner {
            cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Scheduler loop did not stop within 5s");
            }
            info!("Task scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner.lock().is_some()
    }
}
