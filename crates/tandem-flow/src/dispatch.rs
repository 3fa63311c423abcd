//! Call dispatch abstraction for the actuator.
//!
//! This module provides:
//!
//! - [`CallDispatcher`]: Trait the host implements to execute task calls
//! - [`CallOutcome`]: The three-valued result of one call attempt
//! - [`LocalDispatcher`]: An in-process dispatcher routing by callee name
//!
//! ## Design Principles
//!
//! - **Transport agnostic**: The actuator never talks to a network; the
//!   dispatcher owns whatever transport the callee needs
//! - **Three-valued outcomes**: A call can fail definitely or
//!   indeterminately, and the distinction survives retry exhaustion as
//!   `Error` vs `Unknown`
//! - **Idempotent callees**: The actuator retries freely, so every call a
//!   dispatcher serves must be safe to repeat

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::task::TaskRecord;

/// Result of one dispatch attempt, with an opaque receipt.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// The call succeeded.
    Ok(serde_json::Value),
    /// The call definitely failed; retrying may still succeed.
    Failed(serde_json::Value),
    /// The call's effect is unknown (e.g. a timeout after send).
    Indeterminate(serde_json::Value),
}

impl CallOutcome {
    /// Returns true if the call succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns the receipt regardless of outcome.
    #[must_use]
    pub const fn receipt(&self) -> &serde_json::Value {
        match self {
            Self::Ok(r) | Self::Failed(r) | Self::Indeterminate(r) => r,
        }
    }
}

/// Executes task calls on behalf of the actuator.
///
/// The actuator hands every due task to the dispatcher and interprets the
/// returned [`CallOutcome`] against the task's retry budget. Implementations
/// decide what `callee` means: an in-process function, or an endpoint behind
/// whatever transport the host owns.
#[async_trait]
pub trait CallDispatcher: Send + Sync {
    /// Executes one call attempt for the task.
    async fn call(&self, task: &TaskRecord) -> CallOutcome;
}

/// Handles calls for a single callee of a [`LocalDispatcher`].
#[async_trait]
pub trait CallHandler: Send + Sync {
    /// Executes one call attempt.
    async fn handle(&self, task: &TaskRecord) -> CallOutcome;
}

/// Adapter turning a plain function into a [`CallHandler`].
///
/// ## Example
///
/// ```rust
/// use tandem_flow::dispatch::{CallOutcome, FnHandler};
///
/// let handler = FnHandler::new(|_task| CallOutcome::Ok(serde_json::json!("reserved")));
/// ```
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&TaskRecord) -> CallOutcome + Send + Sync,
{
    /// Wraps the function.
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> CallHandler for FnHandler<F>
where
    F: Fn(&TaskRecord) -> CallOutcome + Send + Sync,
{
    async fn handle(&self, task: &TaskRecord) -> CallOutcome {
        (self.0)(task)
    }
}

/// In-process dispatcher routing calls by callee name.
///
/// This is the host-side seam for participants living in the same process
/// as the transaction manager. Calls to unregistered callees fail with a
/// receipt naming the missing handler, which flows through the normal retry
/// and error path rather than panicking the scheduling pass.
#[derive(Default)]
pub struct LocalDispatcher {
    handlers: HashMap<String, Arc<dyn CallHandler>>,
}

impl LocalDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a callee name, replacing any previous one.
    pub fn register(&mut self, callee: impl Into<String>, handler: Arc<dyn CallHandler>) {
        self.handlers.insert(callee.into(), handler);
    }

    /// Registers a handler, builder style.
    #[must_use]
    pub fn with_handler(mut self, callee: impl Into<String>, handler: Arc<dyn CallHandler>) -> Self {
        self.register(callee, handler);
        self
    }

    /// Returns the number of registered callees.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no callees are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for LocalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDispatcher")
            .field("callees", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl CallDispatcher for LocalDispatcher {
    async fn call(&self, task: &TaskRecord) -> CallOutcome {
        match self.handlers.get(&task.callee) {
            Some(handler) => handler.handle(task).await,
            None => CallOutcome::Failed(serde_json::json!({
                "error": format!("no handler registered for callee '{}'", task.callee),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn routes_by_callee_name() {
        let dispatcher = LocalDispatcher::new()
            .with_handler(
                "inventory.reserve",
                Arc::new(FnHandler::new(|_| CallOutcome::Ok(json!("reserved")))),
            )
            .with_handler(
                "inventory.release",
                Arc::new(FnHandler::new(|_| CallOutcome::Ok(json!("released")))),
            );

        let outcome = dispatcher.call(&TaskRecord::local("inventory.release")).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.receipt(), &json!("released"));
    }

    #[tokio::test]
    async fn unknown_callee_fails_with_receipt() {
        let dispatcher = LocalDispatcher::new();
        let outcome = dispatcher.call(&TaskRecord::local("nobody.home")).await;
        assert!(!outcome.is_ok());
        assert!(
            outcome.receipt()["error"]
                .as_str()
                .unwrap()
                .contains("nobody.home")
        );
    }

    #[tokio::test]
    async fn handler_sees_task_payload() {
        let dispatcher = LocalDispatcher::new().with_handler(
            "echo",
            Arc::new(FnHandler::new(|task| CallOutcome::Ok(task.data.clone()))),
        );

        let task = TaskRecord::local("echo").with_data(json!({"n": 7}));
        let outcome = dispatcher.call(&task).await;
        assert_eq!(outcome.receipt()["n"], 7);
    }
}
