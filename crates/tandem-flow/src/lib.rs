//! # tandem-flow
//!
//! Two-phase commit transaction manager for the tandem coordination
//! toolkit.
//!
//! This crate coordinates multi-participant transactions on behalf of a
//! host process. Each transaction (an *order*) groups participants, each
//! supplying three idempotent calls: a **prepare** (vote), a **commit**
//! (apply), and an optional **compensation** (undo). The manager drives
//! every order through the two-phase-commit lifecycle, folding
//! per-participant outcomes into an order-level outcome and exposing
//! governance operations to unblock stuck transactions.
//!
//! ## Core Concepts
//!
//! - **Order**: The transaction envelope; owns participant, commit, and
//!   compensation records
//! - **Actuator**: The retrying call dispatcher all orders share; every
//!   remote call is a [`task::TaskRecord`] with its own retry budget
//! - **Phase verdict**: A pure fold over one phase's task statuses
//!   (`No` dominates `Doing` dominates `Yes`)
//!
//! ## Guarantees
//!
//! - **Single-threaded cooperative**: All operations run to completion
//!   between suspension points; no internal locking
//! - **Deterministic snapshots**: [`manager::TransactionManager::get_data`]
//!   captures all state in id order for host-managed durability
//! - **Loud governance, quiet failure**: Precondition violations are typed
//!   errors; task failures flow into order status, never panics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tandem_flow::dispatch::{CallOutcome, FnHandler, LocalDispatcher};
//! use tandem_flow::manager::TransactionManager;
//! use tandem_flow::order::ParticipantSpec;
//! use tandem_flow::task::TaskRecord;
//!
//! # async fn demo() -> tandem_flow::error::Result<()> {
//! let dispatcher = LocalDispatcher::new().with_handler(
//!     "inventory.reserve",
//!     Arc::new(FnHandler::new(|_| CallOutcome::Ok(serde_json::json!("reserved")))),
//! );
//! let mut tm = TransactionManager::new(Arc::new(dispatcher));
//!
//! let toid = tm.create(serde_json::json!({"ref": "ord-1"}), None);
//! tm.push(
//!     toid,
//!     ParticipantSpec::new(
//!         TaskRecord::local("inventory.reserve"),
//!         TaskRecord::local("inventory.confirm"),
//!     ),
//!     None,
//!     None,
//! )?;
//! tm.finish(toid).await?;
//! tm.run(toid).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod actuator;
pub mod callbacks;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod order;
pub mod phase;
pub mod snapshot;
pub mod store;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::actuator::{Actuator, ActuatorSnapshot, TaskCompletion};
    pub use crate::callbacks::{OrderHook, TaskHook};
    pub use crate::dispatch::{CallDispatcher, CallOutcome, FnHandler, LocalDispatcher};
    pub use crate::error::{Error, Result};
    pub use crate::events::TaskEvent;
    pub use crate::manager::TransactionManager;
    pub use crate::order::{Gate, Order, OrderStatus, ParticipantSpec};
    pub use crate::phase::{Phase, PhaseOutcome};
    pub use crate::snapshot::TmSnapshot;
    pub use crate::store::OrderPage;
    pub use crate::task::{CallKind, TaskRecord, TaskStatus};
    pub use tandem_core::{OrderId, TaskId};
}
