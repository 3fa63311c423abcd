//! Actuator-level task records and statuses.
//!
//! This module provides:
//! - [`TaskStatus`]: The per-action status reported by the actuator
//! - [`CallKind`]: The dispatch-routing tag carried by every task
//! - [`TaskRecord`]: The unit of work queued with the actuator
//!
//! A `TaskRecord` describes one idempotent remote call: who to call, with
//! what payload, under which retry budget. The transaction manager stamps
//! ownership (`toid`, and `for_ttid` for commit and compensation tasks)
//! when it queues the record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::{OrderId, TaskId};

/// Default retry budget for a task.
const DEFAULT_ATTEMPTS_MAX: u32 = 3;

/// Default pause before a failed task is recalled (10 seconds).
const DEFAULT_RECALL_INTERVAL_SECS: u64 = 10;

/// Status of one participant action, as reported by the actuator.
///
/// `Todo` and `Doing` are in-flight; `Done`, `Error`, and `Unknown` are
/// terminal. `Unknown` means the retry budget was exhausted on calls whose
/// effect could not be determined (e.g. a timeout after the request may have
/// been applied) - it is treated like `Error` by phase aggregation but tells
/// an operator a different story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, not yet attempted.
    Todo,
    /// Attempted at least once, awaiting recall.
    Doing,
    /// Completed successfully.
    Done,
    /// Retry budget exhausted on definite failures.
    Error,
    /// Retry budget exhausted without a definite outcome.
    Unknown,
}

impl TaskStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Unknown)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Routing tag for a task's call.
///
/// The actuator does not own any transport; both kinds are handed to the
/// host-supplied dispatcher, which decides how to reach the callee. The tag
/// lets one dispatcher serve in-process participants and remote ones behind
/// a single seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// The callee lives in the host process.
    Local,
    /// The callee is reached over a host-owned transport.
    Remote,
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// One unit of work queued with the actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Callee identity, interpreted by the dispatcher.
    pub callee: String,
    /// Dispatch-routing tag.
    pub kind: CallKind,
    /// Tasks that must complete successfully before this one is due.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_ttids: Vec<TaskId>,
    /// Owning order, stamped by the transaction manager at push time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toid: Option<OrderId>,
    /// The prepare this commit or compensation serves, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_ttid: Option<TaskId>,
    /// Maximum number of dispatch attempts.
    pub attempts_max: u32,
    /// Pause between attempts.
    #[serde(with = "humantime_serde")]
    pub recall_interval: Duration,
    /// Opaque compute budget forwarded to the dispatcher.
    #[serde(default)]
    pub cycles: u64,
    /// Opaque call payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Creates a new task record with default retry policy.
    #[must_use]
    pub fn new(callee: impl Into<String>, kind: CallKind) -> Self {
        Self {
            callee: callee.into(),
            kind,
            pre_ttids: Vec::new(),
            toid: None,
            for_ttid: None,
            attempts_max: DEFAULT_ATTEMPTS_MAX,
            recall_interval: Duration::from_secs(DEFAULT_RECALL_INTERVAL_SECS),
            cycles: 0,
            data: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Creates a record for an in-process callee.
    #[must_use]
    pub fn local(callee: impl Into<String>) -> Self {
        Self::new(callee, CallKind::Local)
    }

    /// Sets the prerequisite tasks.
    #[must_use]
    pub fn with_prerequisites(mut self, pre_ttids: Vec<TaskId>) -> Self {
        self.pre_ttids = pre_ttids;
        self
    }

    /// Sets the maximum number of attempts.
    #[must_use]
    pub const fn with_attempts_max(mut self, attempts_max: u32) -> Self {
        self.attempts_max = attempts_max;
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub const fn with_recall_interval(mut self, recall_interval: Duration) -> Self {
        self.recall_interval = recall_interval;
        self
    }

    /// Sets the compute budget forwarded to the dispatcher.
    #[must_use]
    pub const fn with_cycles(mut self, cycles: u64) -> Self {
        self.cycles = cycles;
        self
    }

    /// Sets the opaque call payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
