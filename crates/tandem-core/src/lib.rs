//! # tandem-core
//!
//! Core abstractions for the tandem transaction manager.
//!
//! This crate provides the foundational types used across all tandem
//! components:
//!
//! - **Identifiers**: Strongly-typed ids for orders and tasks
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `tandem-core` is the **only** crate allowed to define shared primitives.
//! Cross-component interaction happens via the contracts defined here.
//!
//! ## Example
//!
//! ```rust
//! use tandem_core::prelude::*;
//!
//! let first = OrderId::new(1);
//! assert_eq!(first.next(), OrderId::new(2));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;

pub use error::{Error, Result};
pub use id::{OrderId, TaskId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{OrderId, TaskId};
}
