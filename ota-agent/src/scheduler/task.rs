//! Scheduled units of work.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::manifest::Manifest;
use crate::utils::errors::{OtaError, Result};

pub const COMMAND_POLL_TASK: &str = "command_poll";

/// When a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Due on every scheduler pass until removed
    Immediate,
    /// Once a day at a wall-clock time (local)
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Parse a 24-hour `HH:MM` wall-clock time.
    pub fn parse(hhmm: &str) -> Result<Self> {
        NaiveTime::parse_from_str(hhmm.trim(), "%H:%M")
            .map(Schedule::DailyAt)
            .map_err(|e| OtaError::Schedule(format!("invalid time '{}': {}", hhmm, e)))
    }

    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            Schedule::Immediate => now,
            Schedule::DailyAt(at) => next_occurrence(*at, now),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Immediate => f.write_str("immediate"),
            Schedule::DailyAt(at) => write!(f, "{:02}:{:02}", at.hour(), at.minute()),
        }
    }
}

/// Next instant at `at` strictly after `now`; rolls to tomorrow when today's
/// slot is not in the future.
pub fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today <= now {
        today + Duration::days(1)
    } else {
        today
    }
}

/// Closed set of things the scheduler can run.
#[derive(Debug, Clone)]
pub enum TaskKind {
    PeriodicCheck,
    ScheduledInstall { manifest: Arc<Manifest> },
    CommandPoll,
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::PeriodicCheck => "periodic_check",
            TaskKind::ScheduledInstall { .. } => "scheduled_install",
            TaskKind::CommandPoll => "command_poll",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub schedule: Schedule,
    pub last_executed: Option<NaiveDateTime>,
    pub next_execution: NaiveDateTime,
}

impl Task {
    pub fn new(name: impl Into<String>, kind: TaskKind, schedule: Schedule) -> Self {
        Self::new_at(name, kind, schedule, chrono::Local::now().naive_local())
    }

    pub fn new_at(
        name: impl Into<String>,
        kind: TaskKind,
        schedule: Schedule,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            schedule,
            last_executed: None,
            next_execution: schedule.next_after(now),
        }
    }

    /// `update_check_HHMM` at the given time.
    pub fn periodic_check(hhmm: &str) -> Result<Self> {
        let schedule = Schedule::parse(hhmm)?;
        Ok(Self::new(
            format!("update_check_{}", schedule.to_string().replace(':', "")),
            TaskKind::PeriodicCheck,
            schedule,
        ))
    }

    pub fn install(manifest: Arc<Manifest>, schedule: Schedule) -> Self {
        Self::new(
            install_task_name(&manifest.version),
            TaskKind::ScheduledInstall { manifest },
            schedule,
        )
    }

    pub fn command_poll() -> Self {
        Self::new(COMMAND_POLL_TASK, TaskKind::CommandPoll, Schedule::Immediate)
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now >= self.next_execution
    }

    pub(crate) fn mark_executed(&mut self, now: NaiveDateTime) {
        self.last_executed = Some(now);
        self.next_execution = self.schedule.next_after(now);
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.name.clone(),
            kind: self.kind.label(),
            schedule: self.schedule.to_string(),
            last_executed: self.last_executed,
            next_execution: self.next_execution,
        }
    }
}

pub fn install_task_name(version: &str) -> String {
    format!("update_install_{}", version.replace('.', "_"))
}

/// Serializable view of a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub kind: &'static str,
    pub schedule: String,
    pub last_executed: Option<NaiveDateTime>,
    pub next_execution: NaiveDateTime,
}
