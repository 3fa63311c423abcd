//! Completion events recorded by the actuator.
//!
//! Every task that reaches a terminal status leaves a [`TaskEvent`] behind:
//! the receipt of the final call, the terminal status, and the attempt count
//! that got there. Events survive the task queue entry itself (which is
//! dropped at completion) and back both the actuator's `is_completed` answer
//! and post-mortem inspection of settled orders.
//!
//! ## Why ULID for event ids
//!
//! Envelope ids are [ULID](https://github.com/ulid/spec)s rather than UUIDs:
//! ULIDs sort chronologically when compared as strings, so an event log
//! ordered by envelope id is ordered by time with no separate timestamp
//! comparison. The task id itself cannot serve this purpose - a retried
//! governance `update` reassigns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use tandem_core::{OrderId, TaskId};

use crate::task::{TaskRecord, TaskStatus};

/// Terminal record of one actuator task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    /// Unique envelope id (ULID).
    pub id: String,
    /// The completed task.
    pub ttid: TaskId,
    /// The owning order, if the task was stamped with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toid: Option<OrderId>,
    /// Number of attempts consumed, 1-indexed.
    pub attempt: u32,
    /// The terminal status.
    pub status: TaskStatus,
    /// Opaque receipt from the final call.
    #[serde(default)]
    pub receipt: serde_json::Value,
    /// When the task completed.
    pub time: DateTime<Utc>,
}

impl TaskEvent {
    /// Creates a completion event for a task.
    #[must_use]
    pub fn new(
        ttid: TaskId,
        task: &TaskRecord,
        attempt: u32,
        status: TaskStatus,
        receipt: serde_json::Value,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            ttid,
            toid: task.toid,
            attempt,
            status,
            receipt,
            time: Utc::now(),
        }
    }
}
