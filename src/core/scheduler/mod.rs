// src/core/scheduler/mod.rs

//! The scheduled-task engine. Tasks are keyed by deterministic,
//! prefix-namespaced ids (`rule_*`, `ipset_*`, `system_*`) so that
//! reconciliation against a freshly applied config is a set wipe and
//! rebuild. The ticking loop resolves due tasks once a second; every
//! invocation runs in its own task under a per-task cancellation token.

mod schedule;

pub use schedule::Schedule;

use crate::core::errors::FlywallError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const RULE_PREFIX: &str = "rule_";
pub const IPSET_PREFIX: &str = "ipset_";
pub const SYSTEM_PREFIX: &str = "system_";

/// The prefixes whose tasks are owned by config reconciliation.
pub const MANAGED_PREFIXES: &[&str] = &[RULE_PREFIX, IPSET_PREFIX, SYSTEM_PREFIX];

pub type TaskFn =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), FlywallError>> + Send + Sync>;

pub struct ScheduledTask {
    pub id: String,
    pub schedule: Schedule,
    pub func: TaskFn,
    pub enabled: bool,
    pub run_on_start: bool,
}

impl ScheduledTask {
    pub fn new(
        id: impl Into<String>,
        schedule: Schedule,
        func: TaskFn,
    ) -> Self {
        Self {
            id: id.into(),
            schedule,
            func,
            enabled: true,
            run_on_start: false,
        }
    }
}

struct TaskEntry {
    task: ScheduledTask,
    next_run: Option<DateTime<Utc>>,
}

/// Read-only task view for the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub schedule: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    tasks: Mutex<IndexMap<String, TaskEntry>>,
    cancel_root: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(IndexMap::new()),
            cancel_root: CancellationToken::new(),
        }
    }

    /// Registers a task. Replaces any task with the same id.
    pub async fn add(&self, task: ScheduledTask) {
        let now = Utc::now();
        let next_run = if task.run_on_start {
            Some(now)
        } else {
            task.schedule.next(now)
        };
        debug!(id = %task.id, schedule = %task.schedule, ?next_run, "scheduling task");
        self.tasks
            .lock()
            .await
            .insert(task.id.clone(), TaskEntry { task, next_run });
    }

    /// Parses the schedule and registers; a misconfigured schedule is
    /// skipped with a log entry instead of blocking the rest.
    pub async fn add_parsed(
        &self,
        id: &str,
        schedule: &str,
        enabled: bool,
        func: TaskFn,
    ) -> Result<(), FlywallError> {
        let schedule = match Schedule::parse(schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(id, schedule, "skipping task with unparseable schedule: {e}");
                return Err(e);
            }
        };
        self.add(ScheduledTask {
            id: id.to_string(),
            schedule,
            func,
            enabled,
            run_on_start: false,
        })
        .await;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.tasks.lock().await.shift_remove(id).is_some()
    }

    /// Removes every task whose id starts with `prefix`; returns the ids
    /// removed.
    pub async fn remove_prefix(&self, prefix: &str) -> Vec<String> {
        let mut tasks = self.tasks.lock().await;
        let ids: Vec<String> = tasks
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        for id in &ids {
            tasks.shift_remove(id);
        }
        ids
    }

    pub async fn task_ids(&self) -> Vec<String> {
        self.tasks.lock().await.keys().cloned().collect()
    }

    pub async fn task_infos(&self) -> Vec<TaskInfo> {
        self.tasks
            .lock()
            .await
            .values()
            .map(|entry| TaskInfo {
                id: entry.task.id.clone(),
                schedule: entry.task.schedule.to_string(),
                enabled: entry.task.enabled,
                next_run: entry.next_run,
            })
            .collect()
    }

    /// The ticking loop. One-second granularity; due tasks are re-armed
    /// before their invocation is spawned so a slow task never delays its
    /// siblings.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("scheduler started");
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => self.fire_due().await,
                _ = shutdown_rx.recv() => {
                    info!("scheduler shutting down, cancelling running tasks");
                    self.cancel_root.cancel();
                    return;
                }
            }
        }
    }

    /// Cancels every in-flight invocation; used during upgrade handoff.
    pub fn cancel_all(&self) {
        self.cancel_root.cancel();
    }

    async fn fire_due(&self) {
        let now = Utc::now();
        let mut due: Vec<(String, TaskFn)> = Vec::new();
        {
            let mut tasks = self.tasks.lock().await;
            for entry in tasks.values_mut() {
                if !entry.task.enabled {
                    continue;
                }
                let Some(next_run) = entry.next_run else {
                    continue;
                };
                if next_run <= now {
                    entry.next_run = entry.task.schedule.next(now);
                    due.push((entry.task.id.clone(), entry.task.func.clone()));
                }
            }
        }

        for (id, func) in due {
            let token = self.cancel_root.child_token();
            tokio::spawn(async move {
                debug!(task = %id, "task starting");
                match func(token).await {
                    Ok(()) => debug!(task = %id, "task finished"),
                    Err(e) => warn!(task = %id, "task failed: {e}"),
                }
            });
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
