//! Error types for the transaction manager domain.

use tandem_core::{OrderId, TaskId};

use crate::order::OrderStatus;

/// The result type used throughout tandem-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in transaction manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An order was not found in the store.
    #[error("order not found: {toid}")]
    OrderNotFound {
        /// The order id that was not found.
        toid: OrderId,
    },

    /// A participant was not found in an order.
    #[error("participant not found: order {toid}, task {ttid}")]
    ParticipantNotFound {
        /// The owning order.
        toid: OrderId,
        /// The prepare task id that was not found.
        ttid: TaskId,
    },

    /// A task was not found in the actuator queue.
    #[error("task not found: {ttid}")]
    TaskNotFound {
        /// The task id that was not found.
        ttid: TaskId,
    },

    /// A mutation was attempted while the order gate was closed.
    #[error("order {toid} is closed to new participants")]
    OrderClosed {
        /// The order whose gate is closed.
        toid: OrderId,
    },

    /// A mutation was attempted on a terminal order.
    #[error("order {toid} already settled as {status}")]
    OrderSettled {
        /// The terminal order.
        toid: OrderId,
        /// Its terminal status.
        status: OrderStatus,
    },

    /// The gate cannot reopen while a phase fan-out is in flight.
    #[error("order {toid} is mid-phase ({status}); the gate cannot reopen")]
    GateLocked {
        /// The order.
        toid: OrderId,
        /// Its current status.
        status: OrderStatus,
    },

    /// A participant was modified after it already completed.
    #[error("participant {ttid} has already completed")]
    ParticipantCompleted {
        /// The completed prepare task id.
        ttid: TaskId,
    },

    /// A compensation was injected for a prepare that did not succeed.
    #[error("participant {ttid} has no successful prepare to undo")]
    NothingToUndo {
        /// The prepare task id.
        ttid: TaskId,
    },

    /// A second compensation was injected for the same participant.
    #[error("participant {ttid} already has a compensation")]
    DuplicateCompensation {
        /// The prepare task id.
        ttid: TaskId,
    },

    /// A compensation was injected in a phase that accepts none.
    #[error("order {toid} is {status}, which accepts no compensation")]
    CompensationRejected {
        /// The order.
        toid: OrderId,
        /// Its current status.
        status: OrderStatus,
    },

    /// `complete` was called with a non-terminal target status.
    #[error("completion target must be Done or Aborted, got {target}")]
    InvalidCompletionTarget {
        /// The rejected target.
        target: OrderStatus,
    },

    /// An error from tandem-core.
    #[error("core error: {0}")]
    Core(#[from] tandem_core::Error),
}
