//! Callback routing for task and order completions.
//!
//! The host can observe completions at two grains:
//!
//! - [`TaskHook`]: one actuator task settled (a prepare, commit, or
//!   compensation)
//! - [`OrderHook`]: a whole order settled (`Done` or `Aborted`)
//!
//! The [`CallbackRouter`] keeps per-id registrations and process-wide
//! defaults. Per-id entries fire exactly once: they are removed as they are
//! taken, so a late duplicate falls through to the default. Commit hooks
//! have a parking problem - the host registers them at push time, before the
//! commit task has an id - so they are parked under the prepare's id and
//! re-keyed at commit fan-out.
//!
//! Hooks are observers. A hook that fails is logged and forgotten; it can
//! neither veto nor stall the transaction. The only trace a failing order
//! hook leaves is `callback_status = Error` on the order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tandem_core::{OrderId, TaskId};

use crate::order::Order;
use crate::task::{TaskRecord, TaskStatus};

/// Error type hooks may raise; contents are logged, never inspected.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for hook invocations.
pub type HookResult = std::result::Result<(), HookError>;

/// Observer of single-task completions.
#[async_trait]
pub trait TaskHook: Send + Sync {
    /// Called once when a task reaches a terminal status.
    async fn on_task_complete(
        &self,
        ttid: TaskId,
        task: &TaskRecord,
        status: TaskStatus,
        receipt: &serde_json::Value,
    ) -> HookResult;
}

/// Observer of order terminalization.
#[async_trait]
pub trait OrderHook: Send + Sync {
    /// Called once when an order settles as `Done` or `Aborted`.
    async fn on_order_complete(&self, toid: OrderId, order: &Order) -> HookResult;
}

/// Routes completions to per-id hooks, falling back to defaults.
#[derive(Default)]
pub struct CallbackRouter {
    task_hooks: HashMap<TaskId, Arc<dyn TaskHook>>,
    parked_commit_hooks: HashMap<TaskId, Arc<dyn TaskHook>>,
    order_hooks: HashMap<OrderId, Arc<dyn OrderHook>>,
    default_task_hook: Option<Arc<dyn TaskHook>>,
    default_order_hook: Option<Arc<dyn OrderHook>>,
}

impl std::fmt::Debug for CallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRouter")
            .field("task_hooks", &self.task_hooks.len())
            .field("parked_commit_hooks", &self.parked_commit_hooks.len())
            .field("order_hooks", &self.order_hooks.len())
            .field("has_default_task_hook", &self.default_task_hook.is_some())
            .field("has_default_order_hook", &self.default_order_hook.is_some())
            .finish()
    }
}

impl CallbackRouter {
    /// Creates a router with no registrations and no defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the process-wide task hook. Never removed by routing.
    pub fn set_default_task_hook(&mut self, hook: Arc<dyn TaskHook>) {
        self.default_task_hook = Some(hook);
    }

    /// Sets the process-wide order hook. Never removed by routing.
    pub fn set_default_order_hook(&mut self, hook: Arc<dyn OrderHook>) {
        self.default_order_hook = Some(hook);
    }

    /// Registers a hook for one task id, replacing any previous one.
    pub fn register_task_hook(&mut self, ttid: TaskId, hook: Arc<dyn TaskHook>) {
        self.task_hooks.insert(ttid, hook);
    }

    /// Parks a commit hook under the prepare's id until fan-out.
    pub fn park_commit_hook(&mut self, prepare_ttid: TaskId, hook: Arc<dyn TaskHook>) {
        self.parked_commit_hooks.insert(prepare_ttid, hook);
    }

    /// Re-keys a parked commit hook to the commit task's assigned id.
    pub fn promote_commit_hook(&mut self, prepare_ttid: TaskId, commit_ttid: TaskId) {
        if let Some(hook) = self.parked_commit_hooks.remove(&prepare_ttid) {
            self.task_hooks.insert(commit_ttid, hook);
        }
    }

    /// Registers a hook for one order, replacing any previous one.
    pub fn register_order_hook(&mut self, toid: OrderId, hook: Arc<dyn OrderHook>) {
        self.order_hooks.insert(toid, hook);
    }

    /// Drops both registrations for a task id (governance replace/cancel).
    pub fn clear_task_entries(&mut self, ttid: TaskId) {
        self.task_hooks.remove(&ttid);
        self.parked_commit_hooks.remove(&ttid);
    }

    /// Drops every per-task registration belonging to a settling order.
    ///
    /// The order hook is left in place: it is consumed by
    /// [`CallbackRouter::fire_order_hook`], which runs after this purge.
    pub fn purge_task_entries(&mut self, registered_ids: &[TaskId]) {
        for ttid in registered_ids {
            self.clear_task_entries(*ttid);
        }
    }

    /// Fires the task hook for a completion.
    ///
    /// The per-id entry is consumed; without one, the default fires. Hook
    /// failures are logged and swallowed.
    pub async fn fire_task_hook(
        &mut self,
        ttid: TaskId,
        task: &TaskRecord,
        status: TaskStatus,
        receipt: &serde_json::Value,
    ) {
        let hook = self
            .task_hooks
            .remove(&ttid)
            .or_else(|| self.default_task_hook.clone());
        let Some(hook) = hook else { return };
        if let Err(error) = hook.on_task_complete(ttid, task, status, receipt).await {
            tracing::warn!(%ttid, %status, %error, "task hook failed");
        }
    }

    /// Fires the order hook for a terminalization.
    ///
    /// Returns the callback status to record on the order: `Done` when the
    /// hook ran clean, `Error` when it failed, `None` when no hook exists.
    pub async fn fire_order_hook(&mut self, toid: OrderId, order: &Order) -> Option<TaskStatus> {
        let hook = self
            .order_hooks
            .remove(&toid)
            .or_else(|| self.default_order_hook.clone());
        let hook = hook?;
        match hook.on_order_complete(toid, order).await {
            Ok(()) => Some(TaskStatus::Done),
            Err(error) => {
                tracing::warn!(%toid, %error, "order hook failed");
                Some(TaskStatus::Error)
            }
        }
    }
}
