//! Phase aggregation: folding per-task statuses into a phase verdict.
//!
//! Each order moves through up to three phases - prepare, commit, and
//! compensate - and each phase owns a list of task statuses. The verdict for
//! a phase is a pure fold over that list with a strict dominance order:
//! `No` dominates `Doing` dominates `Yes`. The empty list is vacuously
//! `Yes`: a phase with no work has nothing left to fail.

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

/// The three phases of a two-phase-commit order.
///
/// Compensate replaces the classic "abort" message with caller-supplied
/// undo work, so it is a phase with its own task list rather than a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The voting phase: every participant's prepare.
    Prepare,
    /// The apply phase: one commit per participant.
    Commit,
    /// The undo phase: compensations for successfully prepared participants.
    Compensate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prepare => f.write_str("prepare"),
            Self::Commit => f.write_str("commit"),
            Self::Compensate => f.write_str("compensate"),
        }
    }
}

/// Aggregate verdict over one phase's task statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Every task settled successfully (vacuously true of no tasks).
    Yes,
    /// At least one task settled as `Error` or `Unknown`.
    No,
    /// No failures yet, but at least one task is still in flight.
    Doing,
}

impl PhaseOutcome {
    /// Folds a list of task statuses into a phase verdict.
    ///
    /// `No` dominates `Doing` dominates `Yes`; the order of the statuses
    /// never affects the result.
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut verdict = Self::Yes;
        for status in statuses {
            match status {
                TaskStatus::Error | TaskStatus::Unknown => return Self::No,
                TaskStatus::Todo | TaskStatus::Doing => verdict = Self::Doing,
                TaskStatus::Done => {}
            }
        }
        verdict
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Doing => "doing",
        }
    }
}

impl std::fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}
