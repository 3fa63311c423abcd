//! Strongly-typed identifiers for tandem entities.
//!
//! All identifiers in tandem are:
//! - **Strongly typed**: Prevents mixing up different id types at compile time
//! - **Monotonic**: Allocated sequentially by the owning component, so the id
//!   space doubles as an allocation cursor for garbage collection
//! - **Dense**: Plain naturals starting at 1; 0 is never allocated
//!
//! # Example
//!
//! ```rust
//! use tandem_core::id::{OrderId, TaskId};
//!
//! let order = OrderId::new(1);
//! let task = TaskId::new(1);
//!
//! // Ids are different types - this won't compile:
//! // let wrong: OrderId = task;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A unique identifier for a transaction order.
///
/// Orders are the unit of coordination: one order groups the participants of
/// a single multi-party transaction. Order ids are allocated by the order
/// store, monotonically, starting at 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(u64);

impl OrderId {
    /// Creates an order id from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the id immediately following this one.
    ///
    /// Allocators and range sweeps use this to walk the dense id space.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>().map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid order id '{s}': {e}"),
        })
    }
}

/// A unique identifier for an actuator task.
///
/// Task ids are allocated by the actuator, monotonically, starting at 1.
/// The id space is shared by every kind of task the actuator dispatches
/// (prepares, commits, and compensations), so any id identifies at most one
/// action across all orders.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a task id from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the id immediately following this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>().map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid task id '{s}': {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_roundtrip() {
        let id = OrderId::new(42);
        let s = id.to_string();
        let parsed: OrderId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new(7);
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_ordered_and_dense() {
        let first = OrderId::new(1);
        assert!(first < first.next());
        assert_eq!(first.next().value(), 2);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<OrderId>().is_err());
        assert!("-1".parse::<TaskId>().is_err());
        assert!("abc".parse::<OrderId>().is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let id = TaskId::new(9);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "9");
    }
}
