//! Order state: the transaction envelope and its per-participant records.
//!
//! An [`Order`] groups the participants of one two-phase-commit transaction.
//! It owns three parallel record lists, one per phase:
//!
//! - [`Participant`]: prepare-phase record, created when a participant is
//!   pushed
//! - [`CommitRecord`]: commit-phase record, created at commit fan-out
//! - [`CompensationRecord`]: undo record, created at compensate fan-out or
//!   injected by governance
//!
//! Cross-record references are ids, never pointers: a commit names the
//! prepare it serves through `prepare_ttid`, a compensation through
//! `for_ttid`. Lookup is by id within the owning order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::TaskId;

use crate::phase::{Phase, PhaseOutcome};
use crate::task::{TaskRecord, TaskStatus};

/// Order-level status.
///
/// `Done` and `Aborted` are terminal. `Blocking` is reached when a commit or
/// compensate phase fails; it is left only by operator intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, not yet run.
    Todo,
    /// Prepares in flight.
    Preparing,
    /// Prepare phase succeeded; commits in flight.
    Committing,
    /// Prepare phase failed; compensations in flight.
    Compensating,
    /// A commit or compensate phase failed; waiting for an operator.
    Blocking,
    /// Every commit succeeded.
    Done,
    /// Every compensation succeeded.
    Aborted,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Preparing => "preparing",
            Self::Committing => "committing",
            Self::Compensating => "compensating",
            Self::Blocking => "blocking",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => f.write_str("Todo"),
            Self::Preparing => f.write_str("Preparing"),
            Self::Committing => f.write_str("Committing"),
            Self::Compensating => f.write_str("Compensating"),
            Self::Blocking => f.write_str("Blocking"),
            Self::Done => f.write_str("Done"),
            Self::Aborted => f.write_str("Aborted"),
        }
    }
}

/// The participant-admission gate.
///
/// Participants may only be pushed while `Opening`. The gate must be
/// `Closed` before a phase verdict may settle the order, so a failing vote
/// never aborts a transaction that is still being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// New participants are accepted.
    Opening,
    /// The participant set is final.
    Closed,
}

impl Gate {
    /// Returns true if new participants are accepted.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Opening)
    }
}

/// One participant's triplet, as supplied by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSpec {
    /// The voting call.
    pub prepare: TaskRecord,
    /// The apply call, pushed only after the prepare phase succeeds.
    pub commit: TaskRecord,
    /// The undo call, pushed only if the order compensates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp: Option<TaskRecord>,
}

impl ParticipantSpec {
    /// Creates a participant from its prepare and commit calls.
    #[must_use]
    pub const fn new(prepare: TaskRecord, commit: TaskRecord) -> Self {
        Self {
            prepare,
            commit,
            comp: None,
        }
    }

    /// Attaches an undo call.
    #[must_use]
    pub fn with_compensation(mut self, comp: TaskRecord) -> Self {
        self.comp = Some(comp);
        self
    }
}

/// Prepare-phase record for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The prepare task's actuator id.
    pub ttid: TaskId,
    /// The voting call.
    pub prepare: TaskRecord,
    /// The apply call, held until commit fan-out.
    pub commit: TaskRecord,
    /// The undo call, held until compensate fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp: Option<TaskRecord>,
    /// Status of the prepare, as reported by the actuator.
    pub status: TaskStatus,
}

/// Commit-phase record for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// The commit task's actuator id, assigned at fan-out.
    pub ttid: TaskId,
    /// The apply call as pushed.
    pub commit: TaskRecord,
    /// The prepare this commit serves.
    pub prepare_ttid: TaskId,
    /// Status of the commit.
    pub status: TaskStatus,
}

/// Undo record for one successfully prepared participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    /// The prepare being undone.
    pub for_ttid: TaskId,
    /// The compensation task's actuator id.
    pub tcid: TaskId,
    /// The undo call as pushed.
    pub comp: TaskRecord,
    /// Status of the compensation.
    pub status: TaskStatus,
}

/// A two-phase-commit transaction envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Participants, in push order.
    pub tasks: Vec<Participant>,
    /// Commit records, created at commit fan-out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<CommitRecord>,
    /// Compensation records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comps: Vec<CompensationRecord>,
    /// The participant-admission gate.
    pub gate: Gate,
    /// Order-level status.
    pub status: OrderStatus,
    /// Outcome of the order callback, recorded at terminalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_status: Option<TaskStatus>,
    /// When the order was created; retention is measured from here.
    pub time: DateTime<Utc>,
    /// Opaque host payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Order {
    /// Creates a fresh order: no participants, gate open, status `Todo`.
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            tasks: Vec::new(),
            commits: Vec::new(),
            comps: Vec::new(),
            gate: Gate::Opening,
            status: OrderStatus::Todo,
            callback_status: None,
            time: Utc::now(),
            data,
        }
    }

    /// Returns true if the order reached a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Looks up a participant by its prepare id.
    #[must_use]
    pub fn participant(&self, ttid: TaskId) -> Option<&Participant> {
        self.tasks.iter().find(|p| p.ttid == ttid)
    }

    /// Looks up a participant by its prepare id, mutably.
    pub fn participant_mut(&mut self, ttid: TaskId) -> Option<&mut Participant> {
        self.tasks.iter_mut().find(|p| p.ttid == ttid)
    }

    /// Returns true if a compensation already exists for a prepare.
    #[must_use]
    pub fn has_compensation_for(&self, for_ttid: TaskId) -> bool {
        self.comps.iter().any(|c| c.for_ttid == for_ttid)
    }

    /// Applies an actuator-reported status to the record owning the id.
    ///
    /// Records are searched in phase order - participants, then commits,
    /// then compensations - and the first id match wins. Id spaces are
    /// globally disjoint, so at most one record can match.
    ///
    /// Returns false if no record in this order owns the id.
    pub fn apply_task_status(&mut self, id: TaskId, status: TaskStatus) -> bool {
        if let Some(p) = self.tasks.iter_mut().find(|p| p.ttid == id) {
            p.status = status;
            return true;
        }
        if let Some(c) = self.commits.iter_mut().find(|c| c.ttid == id) {
            c.status = status;
            return true;
        }
        if let Some(c) = self.comps.iter_mut().find(|c| c.tcid == id) {
            c.status = status;
            return true;
        }
        false
    }

    /// Folds one phase's record statuses into a verdict.
    #[must_use]
    pub fn phase_outcome(&self, phase: Phase) -> PhaseOutcome {
        match phase {
            Phase::Prepare => PhaseOutcome::aggregate(self.tasks.iter().map(|p| p.status)),
            Phase::Commit => PhaseOutcome::aggregate(self.commits.iter().map(|c| c.status)),
            Phase::Compensate => PhaseOutcome::aggregate(self.comps.iter().map(|c| c.status)),
        }
    }

    /// Every actuator id registered anywhere in this order.
    ///
    /// Used to purge per-task callback registrations when the order settles.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .map(|p| p.ttid)
            .chain(self.commits.iter().map(|c| c.ttid))
            .chain(self.comps.iter().map(|c| c.tcid))
            .collect()
    }
}
