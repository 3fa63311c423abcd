//! The reference actuator: a deterministic retrying call dispatcher.
//!
//! The actuator owns a queue of [`TaskRecord`]s, each with its own retry
//! budget and recall timer. One call to [`Actuator::run`] is one scheduling
//! pass: every due task is handed to the [`CallDispatcher`] exactly once,
//! and tasks that reach a terminal status are returned as
//! [`TaskCompletion`]s for the caller to react to. The actuator itself holds
//! no opinion about what a task means - that is the transaction manager's
//! business.
//!
//! ## Determinism
//!
//! Passes are sequential and ordered by task id, and the actuator performs
//! no background work: nothing happens between calls to `run`. This keeps
//! the whole engine single-threaded cooperative and makes any state between
//! passes a consistent snapshot.
//!
//! ## Completion delivery
//!
//! `run` returns the pass's completions instead of invoking a callback per
//! completion. The caller drains the batch in order, which gives the same
//! per-completion sequencing a callback would, without entangling the
//! actuator with its owner.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::{OrderId, TaskId};

use crate::dispatch::{CallDispatcher, CallOutcome};
use crate::error::{Error, Result};
use crate::events::TaskEvent;
use crate::task::{TaskRecord, TaskStatus};

/// A task waiting in the actuator queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    /// The queued record.
    pub task: TaskRecord,
    /// `Todo` until the first attempt, `Doing` while awaiting recall.
    pub status: TaskStatus,
    /// Attempts consumed so far.
    pub attempts: u32,
    /// When the next attempt is due; `None` means immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// A task that reached a terminal status during a scheduling pass.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    /// The completed task's id.
    pub ttid: TaskId,
    /// The completed record.
    pub task: TaskRecord,
    /// The terminal status (`Done`, `Error`, or `Unknown`).
    pub status: TaskStatus,
    /// Opaque receipt from the final call.
    pub receipt: serde_json::Value,
}

/// Serializable actuator state for host-managed durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorSnapshot {
    /// Next task id to allocate.
    pub next_id: TaskId,
    /// Smallest id that may still be referenced.
    pub first_index: TaskId,
    /// Queued tasks, ordered by id.
    pub entries: Vec<(TaskId, QueuedTask)>,
    /// Completion events, ordered by id.
    pub events: Vec<(TaskId, TaskEvent)>,
}

/// The retrying call dispatcher behind the transaction manager.
pub struct Actuator {
    dispatcher: Arc<dyn CallDispatcher>,
    next_id: TaskId,
    first_index: TaskId,
    entries: BTreeMap<TaskId, QueuedTask>,
    events: BTreeMap<TaskId, TaskEvent>,
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("next_id", &self.next_id)
            .field("first_index", &self.first_index)
            .field("pending", &self.entries.len())
            .field("completed", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Actuator {
    /// Creates an empty actuator over the given dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn CallDispatcher>) -> Self {
        Self {
            dispatcher,
            next_id: TaskId::new(1),
            first_index: TaskId::new(1),
            entries: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    /// Enqueues a task and returns its assigned id.
    pub fn push(&mut self, task: TaskRecord) -> TaskId {
        let ttid = self.next_id;
        self.next_id = self.next_id.next();
        self.entries.insert(
            ttid,
            QueuedTask {
                task,
                status: TaskStatus::Todo,
                attempts: 0,
                next_attempt_at: None,
            },
        );
        ttid
    }

    /// Replaces a not-yet-completed task, reassigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParticipantCompleted`] if the task already reached a
    /// terminal status, or [`Error::TaskNotFound`] if it was never queued.
    pub fn update(&mut self, ttid: TaskId, task: TaskRecord) -> Result<TaskId> {
        if self.events.contains_key(&ttid) {
            return Err(Error::ParticipantCompleted { ttid });
        }
        if self.entries.remove(&ttid).is_none() {
            return Err(Error::TaskNotFound { ttid });
        }
        Ok(self.push(task))
    }

    /// Drops a not-yet-completed task.
    ///
    /// Returns `None` if the task is unknown or already completed.
    pub fn remove(&mut self, ttid: TaskId) -> Option<TaskId> {
        self.entries.remove(&ttid).map(|_| ttid)
    }

    /// Drops every queued task owned by an order, so the actuator stops
    /// retrying work for a settled transaction.
    pub fn remove_by_order(&mut self, toid: OrderId) -> Vec<TaskId> {
        let doomed: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.task.toid == Some(toid))
            .map(|(ttid, _)| *ttid)
            .collect();
        for ttid in &doomed {
            self.entries.remove(ttid);
        }
        doomed
    }

    /// Executes one scheduling pass.
    ///
    /// Every due task (recall timer elapsed, prerequisites completed
    /// successfully) is dispatched once, in id order. Tasks that settle
    /// during the pass are returned in execution order.
    #[tracing::instrument(skip(self), fields(pending = self.entries.len()))]
    pub async fn run(&mut self) -> Vec<TaskCompletion> {
        let now = Utc::now();
        let due: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_due(entry, now))
            .map(|(ttid, _)| *ttid)
            .collect();

        let dispatcher = Arc::clone(&self.dispatcher);
        let mut completions = Vec::new();

        for ttid in due {
            // The entry may have been a prerequisite of nothing; it is still
            // present because only this loop removes entries.
            let Some(entry) = self.entries.get(&ttid) else {
                continue;
            };
            let task = entry.task.clone();
            let outcome = dispatcher.call(&task).await;

            let Some(entry) = self.entries.get_mut(&ttid) else {
                continue;
            };
            entry.attempts += 1;
            let attempts = entry.attempts;
            let exhausted = attempts >= entry.task.attempts_max;

            let settled = match outcome {
                CallOutcome::Ok(receipt) => Some((TaskStatus::Done, receipt)),
                CallOutcome::Failed(receipt) if exhausted => Some((TaskStatus::Error, receipt)),
                CallOutcome::Indeterminate(receipt) if exhausted => {
                    Some((TaskStatus::Unknown, receipt))
                }
                CallOutcome::Failed(_) | CallOutcome::Indeterminate(_) => {
                    entry.status = TaskStatus::Doing;
                    entry.next_attempt_at = Some(recall_at(now, entry.task.recall_interval));
                    None
                }
            };

            if let Some((status, receipt)) = settled {
                self.entries.remove(&ttid);
                let event = TaskEvent::new(ttid, &task, attempts, status, receipt.clone());
                tracing::debug!(%ttid, %status, attempts, "task settled");
                self.events.insert(ttid, event);
                completions.push(TaskCompletion {
                    ttid,
                    task,
                    status,
                    receipt,
                });
            }
        }

        completions
    }

    /// Returns true if the task reached a terminal status.
    #[must_use]
    pub fn is_completed(&self, ttid: TaskId) -> bool {
        self.events.contains_key(&ttid)
    }

    /// Returns the completion event for a task, if it settled.
    #[must_use]
    pub fn task_event(&self, ttid: TaskId) -> Option<&TaskEvent> {
        self.events.get(&ttid)
    }

    /// Returns the queued entry for a task, if still pending.
    #[must_use]
    pub fn queued(&self, ttid: TaskId) -> Option<&QueuedTask> {
        self.entries.get(&ttid)
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of queued tasks owned by an order.
    #[must_use]
    pub fn pending_for_order(&self, toid: OrderId) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.task.toid == Some(toid))
            .count()
    }

    /// Garbage-collects expired completion events.
    ///
    /// Sweeps `first_index` upward: empty id slots are skipped; expired
    /// events (`now > time + retention`) are deleted when `Done`, or
    /// unconditionally when `del_exc` is set. The sweep stops at the first
    /// slot it may not delete, so ids below `first_index` are always gone.
    pub fn clear(&mut self, retention: Duration, del_exc: bool) {
        let now = Utc::now();
        while self.first_index < self.next_id {
            if self.entries.contains_key(&self.first_index) {
                break;
            }
            match self.events.get(&self.first_index) {
                None => self.first_index = self.first_index.next(),
                Some(event) => {
                    let expired = now > recall_at(event.time, retention);
                    let deletable = del_exc || event.status == TaskStatus::Done;
                    if expired && deletable {
                        self.events.remove(&self.first_index);
                        self.first_index = self.first_index.next();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Captures all actuator state for host-managed durability.
    ///
    /// The dispatcher is not part of the snapshot; it is re-supplied by the
    /// host when the actuator is rebuilt.
    #[must_use]
    pub fn snapshot(&self) -> ActuatorSnapshot {
        ActuatorSnapshot {
            next_id: self.next_id,
            first_index: self.first_index,
            entries: self.entries.iter().map(|(k, v)| (*k, v.clone())).collect(),
            events: self.events.iter().map(|(k, v)| (*k, v.clone())).collect(),
        }
    }

    /// Replaces all actuator state from a snapshot.
    pub fn restore(&mut self, snapshot: ActuatorSnapshot) {
        self.next_id = snapshot.next_id;
        self.first_index = snapshot.first_index;
        self.entries = snapshot.entries.into_iter().collect();
        self.events = snapshot.events.into_iter().collect();
    }

    /// Smallest id that may still be referenced.
    #[must_use]
    pub fn first_index(&self) -> TaskId {
        self.first_index
    }

    fn is_due(&self, entry: &QueuedTask, now: DateTime<Utc>) -> bool {
        let timer_ok = entry.next_attempt_at.is_none_or(|at| at <= now);
        let prereqs_ok = entry.task.pre_ttids.iter().all(|pre| {
            self.events
                .get(pre)
                .is_some_and(|event| event.status == TaskStatus::Done)
        });
        timer_ok && prereqs_ok
    }
}

/// Adds a duration to an instant, saturating at the far future.
fn recall_at(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
