//! The transaction manager: order orchestration and governance.
//!
//! [`TransactionManager`] drives every order through the two-phase-commit
//! lifecycle:
//!
//! ```text
//!                         prepare=yes                commit=yes
//! ┌──────┐  run   ┌───────────┐     ┌────────────┐      ┌──────┐
//! │ TODO │───────►│ PREPARING │────►│ COMMITTING │─────►│ DONE │
//! └──────┘        └───────────┘     └────────────┘      └──────┘
//!                       │                  │ commit=no
//!                       │ prepare=no       ▼
//!                       │            ┌──────────┐  operator   ┌─────────┐
//!                       │            │ BLOCKING │◄────────────│ (stuck) │
//!                       ▼            └──────────┘             └─────────┘
//!                ┌──────────────┐          ▲ compensate=no
//!                │ COMPENSATING │──────────┘
//!                └──────────────┘
//!                       │ compensate=yes
//!                       ▼
//!                  ┌─────────┐
//!                  │ ABORTED │
//!                  └─────────┘
//! ```
//!
//! Phase verdicts only settle an order whose gate is `Closed`, so a
//! transaction still being assembled can never be decided by an early vote.
//! `Blocking` is the operator's domain: `append_comp` injects recovery work
//! and `complete` forces the order terminal once the relevant phase reads
//! `Yes`.
//!
//! ## Concurrency model
//!
//! The manager is single-threaded cooperative: every operation takes
//! `&mut self` and runs to completion between suspension points, which occur
//! only while awaiting the dispatcher or a user hook inside `run`, `finish`,
//! and `complete`. Any state observed between suspension points is
//! consistent. A host on a threaded runtime serializes access by owning the
//! manager from a single task; no internal locking exists or is needed.

use std::sync::Arc;
use std::time::Duration;

use tandem_core::{OrderId, TaskId};

use crate::actuator::{Actuator, TaskCompletion};
use crate::callbacks::{CallbackRouter, OrderHook, TaskHook};
use crate::dispatch::CallDispatcher;
use crate::error::{Error, Result};
use crate::metrics::FlowMetrics;
use crate::order::{
    CommitRecord, CompensationRecord, Gate, Order, OrderStatus, Participant, ParticipantSpec,
};
use crate::phase::{Phase, PhaseOutcome};
use crate::snapshot::TmSnapshot;
use crate::store::{OrderPage, OrderStore};
use crate::task::{TaskRecord, TaskStatus};

/// Coordinator for multi-participant two-phase-commit transactions.
pub struct TransactionManager {
    store: OrderStore,
    actuator: Actuator,
    router: CallbackRouter,
    metrics: FlowMetrics,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("orders", &self.store.count())
            .field("alive", &self.store.alive_ids().len())
            .field("actuator", &self.actuator)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager over the given call dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn CallDispatcher>) -> Self {
        Self {
            store: OrderStore::new(),
            actuator: Actuator::new(dispatcher),
            router: CallbackRouter::new(),
            metrics: FlowMetrics::new(),
        }
    }

    /// Sets the process-wide task hook, builder style.
    #[must_use]
    pub fn with_default_task_hook(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.router.set_default_task_hook(hook);
        self
    }

    /// Sets the process-wide order hook, builder style.
    #[must_use]
    pub fn with_default_order_hook(mut self, hook: Arc<dyn OrderHook>) -> Self {
        self.router.set_default_order_hook(hook);
        self
    }

    /// Sets the retention window for settled orders, builder style.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.store.set_retention(retention);
        self
    }

    // ------------------------------------------------------------------
    // Order assembly
    // ------------------------------------------------------------------

    /// Creates a fresh order: gate open, status `Todo`, no participants.
    ///
    /// The optional hook fires once when the order settles.
    pub fn create(
        &mut self,
        data: serde_json::Value,
        order_hook: Option<Arc<dyn OrderHook>>,
    ) -> OrderId {
        let toid = self.store.create(data);
        if let Some(hook) = order_hook {
            self.router.register_order_hook(toid, hook);
        }
        self.metrics
            .record_order_transition(OrderStatus::Todo.as_label());
        tracing::debug!(%toid, "order created");
        toid
    }

    /// Adds a participant to an order, queueing its prepare with the
    /// actuator. Returns the prepare's task id.
    ///
    /// `task_hook` fires when the prepare settles; `commit_hook` is parked
    /// and fires when the participant's commit settles (it is re-keyed to
    /// the commit's id at fan-out).
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, settled, or gated `Closed`.
    pub fn push(
        &mut self,
        toid: OrderId,
        spec: ParticipantSpec,
        task_hook: Option<Arc<dyn TaskHook>>,
        commit_hook: Option<Arc<dyn TaskHook>>,
    ) -> Result<TaskId> {
        self.guard_open(toid)?;

        let ParticipantSpec {
            mut prepare,
            commit,
            comp,
        } = spec;
        prepare.toid = Some(toid);

        let ttid = self.actuator.push(prepare.clone());
        if let Some(hook) = task_hook {
            self.router.register_task_hook(ttid, hook);
        }
        if let Some(hook) = commit_hook {
            self.router.park_commit_hook(ttid, hook);
        }

        let Some(order) = self.store.get_mut(toid) else {
            // Unreachable: the guard above established existence.
            return Err(Error::OrderNotFound { toid });
        };
        order.tasks.push(Participant {
            ttid,
            prepare,
            commit,
            comp,
            status: TaskStatus::Todo,
        });
        self.store.mark_alive(toid);
        self.metrics.set_alive_orders(self.store.alive_ids().len());
        tracing::debug!(%toid, %ttid, "participant pushed");
        Ok(ttid)
    }

    /// Adds a participant to an in-flight order.
    ///
    /// Same contract as [`TransactionManager::push`]; the distinct name
    /// marks the governance intent of growing an order after `run`.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, settled, or gated `Closed`.
    pub fn append(
        &mut self,
        toid: OrderId,
        spec: ParticipantSpec,
        task_hook: Option<Arc<dyn TaskHook>>,
        commit_hook: Option<Arc<dyn TaskHook>>,
    ) -> Result<TaskId> {
        self.push(toid, spec, task_hook, commit_hook)
    }

    /// Reopens an order's gate so participants can be pushed again.
    ///
    /// Only orders that are not mid-fan-out may reopen: an open gate
    /// coexists with `Todo`, `Preparing`, and `Blocking` statuses, never
    /// with `Committing` or `Compensating`.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, settled, or mid-phase.
    pub fn open(&mut self, toid: OrderId) -> Result<()> {
        let order = self.guard_mut(toid)?;
        if matches!(
            order.status,
            OrderStatus::Committing | OrderStatus::Compensating
        ) {
            let status = order.status;
            return Err(Error::GateLocked { toid, status });
        }
        order.gate = Gate::Opening;
        Ok(())
    }

    /// Closes an order's gate, making the participant set final, and
    /// re-evaluates the state machine: if every prepare already settled
    /// while the gate was open, the phase verdict takes effect now.
    ///
    /// Idempotent: closing a closed gate changes nothing.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown or settled.
    pub async fn finish(&mut self, toid: OrderId) -> Result<()> {
        let order = self.guard_mut(toid)?;
        order.gate = Gate::Closed;
        self.advance(toid, Gate::Closed).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Starts an order (`Todo → Preparing`) and drives the shared actuator
    /// one scheduling pass, applying every completion the pass produced.
    ///
    /// Returns the number of tasks that settled during the pass (across all
    /// orders - the actuator is shared).
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown.
    #[tracing::instrument(skip(self), fields(toid = %toid))]
    pub async fn run(&mut self, toid: OrderId) -> Result<usize> {
        let order = self
            .store
            .get_mut(toid)
            .ok_or(Error::OrderNotFound { toid })?;
        if order.status == OrderStatus::Todo {
            order.status = OrderStatus::Preparing;
            self.metrics
                .record_order_transition(OrderStatus::Preparing.as_label());
        }

        let completions = self.actuator.run().await;
        let settled = completions.len();
        for completion in completions {
            self.apply_completion(completion).await;
        }

        // Cover prepares that settled on an earlier pass, before this order
        // left Todo: no further completion will arrive to re-evaluate it.
        let gate = self.store.get(toid).map(|o| o.gate);
        if let Some(gate) = gate {
            self.advance(toid, gate).await;
        }
        Ok(settled)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Number of orders currently stored.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    /// Status of an order, if it exists.
    #[must_use]
    pub fn status(&self, toid: OrderId) -> Option<OrderStatus> {
        self.store.get(toid).map(|o| o.status)
    }

    /// Returns true if the order settled (`Done` or `Aborted`).
    #[must_use]
    pub fn is_completed(&self, toid: OrderId) -> bool {
        self.status(toid).is_some_and(|s| s.is_terminal())
    }

    /// Returns true if an actuator task reached a terminal status.
    #[must_use]
    pub fn is_task_completed(&self, ttid: TaskId) -> bool {
        self.actuator.is_completed(ttid)
    }

    /// Looks up an order.
    #[must_use]
    pub fn get_order(&self, toid: OrderId) -> Option<&Order> {
        self.store.get(toid)
    }

    /// Returns one page of orders over the live id range (1-indexed).
    #[must_use]
    pub fn get_orders(&self, page: usize, size: usize) -> OrderPage {
        self.store.page(page, size)
    }

    /// Ids of orders that are in flight: at least one participant, not yet
    /// settled.
    #[must_use]
    pub fn alive_orders(&self) -> Vec<OrderId> {
        self.store.alive_ids()
    }

    /// The completion log for an order: actuator ids in delivery order.
    #[must_use]
    pub fn task_events(&self, toid: OrderId) -> Option<&[TaskId]> {
        self.store.task_events(toid)
    }

    /// The phase verdict for an order, `None` if the order does not exist.
    #[must_use]
    pub fn phase_outcome(&self, toid: OrderId, phase: Phase) -> Option<PhaseOutcome> {
        self.store.get(toid).map(|o| o.phase_outcome(phase))
    }

    /// Read access to the shared actuator.
    #[must_use]
    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    /// Write access to the shared actuator, for hosts queueing their own
    /// standalone tasks. Scheduling passes should still go through
    /// [`TransactionManager::run`] so completions reach the proxy routine.
    pub fn actuator_mut(&mut self) -> &mut Actuator {
        &mut self.actuator
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Replaces the retention window for settled orders.
    pub fn set_cache_expiration(&mut self, retention: Duration) {
        self.store.set_retention(retention);
    }

    /// Garbage-collects expired orders and actuator events.
    ///
    /// With `del_exc` set, expired orders are reclaimed even when not
    /// settled (and actuator events even when not `Done`).
    pub fn clear(&mut self, del_exc: bool) {
        self.store.sweep(del_exc);
        self.actuator.clear(self.store.retention(), del_exc);
        self.metrics.set_alive_orders(self.store.alive_ids().len());
    }

    // ------------------------------------------------------------------
    // Governance
    // ------------------------------------------------------------------

    /// Replaces a participant's triplet before the participant completed.
    ///
    /// The actuator reassigns the prepare's id; hooks registered for the old
    /// id are dropped and the given ones registered under the new id.
    /// Returns the new prepare id.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown, settled, or gated `Closed`; if the
    /// participant is unknown; or if its prepare already completed.
    pub fn update(
        &mut self,
        toid: OrderId,
        ttid: TaskId,
        spec: ParticipantSpec,
        task_hook: Option<Arc<dyn TaskHook>>,
        commit_hook: Option<Arc<dyn TaskHook>>,
    ) -> Result<TaskId> {
        let order = self.guard_open(toid)?;
        let participant = order
            .participant(ttid)
            .ok_or(Error::ParticipantNotFound { toid, ttid })?;
        if participant.status.is_terminal() {
            return Err(Error::ParticipantCompleted { ttid });
        }

        let ParticipantSpec {
            mut prepare,
            commit,
            comp,
        } = spec;
        prepare.toid = Some(toid);

        let new_ttid = self.actuator.update(ttid, prepare.clone())?;
        self.router.clear_task_entries(ttid);
        if let Some(hook) = task_hook {
            self.router.register_task_hook(new_ttid, hook);
        }
        if let Some(hook) = commit_hook {
            self.router.park_commit_hook(new_ttid, hook);
        }

        if let Some(order) = self.store.get_mut(toid) {
            if let Some(participant) = order.participant_mut(ttid) {
                participant.ttid = new_ttid;
                participant.prepare = prepare;
                participant.commit = commit;
                participant.comp = comp;
                participant.status = TaskStatus::Todo;
            }
        }
        tracing::debug!(%toid, old = %ttid, new = %new_ttid, "participant replaced");
        Ok(new_ttid)
    }

    /// Cancels a not-yet-completed participant, removing it from the order
    /// and from the actuator queue.
    ///
    /// Returns `None` when any precondition fails: unknown or settled
    /// order, closed gate, unknown participant, or a participant whose
    /// prepare already completed.
    pub fn remove(&mut self, toid: OrderId, ttid: TaskId) -> Option<TaskId> {
        let order = self.guard_open(toid).ok()?;
        let participant = order.participant(ttid)?;
        if participant.status.is_terminal() || self.actuator.is_completed(ttid) {
            return None;
        }

        let removed = self.actuator.remove(ttid)?;
        self.router.clear_task_entries(ttid);
        let order = self.store.get_mut(toid)?;
        order.tasks.retain(|p| p.ttid != ttid);
        if order.tasks.is_empty() {
            self.store.unmark_alive(toid);
            self.metrics.set_alive_orders(self.store.alive_ids().len());
        }
        tracing::debug!(%toid, %ttid, "participant cancelled");
        Some(removed)
    }

    /// Injects a compensation for a successfully prepared participant of a
    /// `Compensating` or `Blocking` order, queueing it with the actuator
    /// immediately. This is the recovery path for blocked orders: once the
    /// injected undo work settles, `complete(toid, Aborted)` can succeed.
    ///
    /// Returns the compensation's task id.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown or settled; if it is in a phase that
    /// accepts no late compensation; if the participant is unknown; if its
    /// prepare did not settle `Done`; or if it already has a compensation.
    pub fn append_comp(
        &mut self,
        toid: OrderId,
        for_ttid: TaskId,
        comp: TaskRecord,
        hook: Option<Arc<dyn TaskHook>>,
    ) -> Result<TaskId> {
        let order = self.guard(toid)?;
        if !matches!(
            order.status,
            OrderStatus::Compensating | OrderStatus::Blocking
        ) {
            return Err(Error::CompensationRejected {
                toid,
                status: order.status,
            });
        }
        let participant = order
            .participant(for_ttid)
            .ok_or(Error::ParticipantNotFound { toid, ttid: for_ttid })?;
        if participant.status != TaskStatus::Done {
            return Err(Error::NothingToUndo { ttid: for_ttid });
        }
        if order.has_compensation_for(for_ttid) {
            return Err(Error::DuplicateCompensation { ttid: for_ttid });
        }

        let mut comp = comp;
        comp.toid = Some(toid);
        comp.for_ttid = Some(for_ttid);
        let tcid = self.actuator.push(comp.clone());
        if let Some(hook) = hook {
            self.router.register_task_hook(tcid, hook);
        }
        if let Some(order) = self.store.get_mut(toid) {
            order.comps.push(CompensationRecord {
                for_ttid,
                tcid,
                comp,
                status: TaskStatus::Todo,
            });
        }
        tracing::debug!(%toid, %for_ttid, %tcid, "compensation injected");
        Ok(tcid)
    }

    /// Forces a `Blocking` order terminal.
    ///
    /// Succeeds only when the order is `Blocking` with a closed gate and
    /// the phase backing the target reads `Yes`: the commit phase for
    /// `Done`, the compensate phase for `Aborted`. On success the order
    /// settles exactly as it would have naturally.
    ///
    /// # Errors
    ///
    /// Fails if the target is not a terminal status, or the order is
    /// unknown. Unsatisfied phase conditions return `Ok(false)`.
    #[tracing::instrument(skip(self), fields(toid = %toid, target = %target))]
    pub async fn complete(&mut self, toid: OrderId, target: OrderStatus) -> Result<bool> {
        if !target.is_terminal() {
            return Err(Error::InvalidCompletionTarget { target });
        }
        let order = self
            .store
            .get(toid)
            .ok_or(Error::OrderNotFound { toid })?;
        if order.status != OrderStatus::Blocking || order.gate.is_open() {
            return Ok(false);
        }
        let phase = if target == OrderStatus::Done {
            Phase::Commit
        } else {
            Phase::Compensate
        };
        if order.phase_outcome(phase) != PhaseOutcome::Yes {
            return Ok(false);
        }
        self.settle(toid, target).await;
        Ok(true)
    }

    /// Registers a hook for one actuator task id, replacing any previous
    /// one. Hosts use this to re-attach hooks after a snapshot restore.
    pub fn register_task_hook(&mut self, ttid: TaskId, hook: Arc<dyn TaskHook>) {
        self.router.register_task_hook(ttid, hook);
    }

    /// Registers a hook firing when the order settles, replacing any
    /// previous one.
    ///
    /// # Errors
    ///
    /// Fails if the order is unknown.
    pub fn register_order_hook(&mut self, toid: OrderId, hook: Arc<dyn OrderHook>) -> Result<()> {
        if self.store.get(toid).is_none() {
            return Err(Error::OrderNotFound { toid });
        }
        self.router.register_order_hook(toid, hook);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot
    // ------------------------------------------------------------------

    /// Captures all manager state for host-managed durability.
    ///
    /// Callback registrations are not captured; see [`crate::snapshot`].
    #[must_use]
    pub fn get_data(&self) -> TmSnapshot {
        TmSnapshot {
            store: self.store.export(),
            actuator: self.actuator.snapshot(),
        }
    }

    /// Replaces all manager state from a snapshot.
    pub fn set_data(&mut self, snapshot: TmSnapshot) {
        self.store.restore(snapshot.store);
        self.actuator.restore(snapshot.actuator);
        self.metrics.set_alive_orders(self.store.alive_ids().len());
    }

    // ------------------------------------------------------------------
    // Orchestration internals
    // ------------------------------------------------------------------

    /// Applies one actuator completion: record bookkeeping, user hook,
    /// state-machine evaluation, event log. This is the proxy routine every
    /// completion flows through, in delivery order.
    async fn apply_completion(&mut self, completion: TaskCompletion) {
        self.metrics
            .record_task_completion(completion.status.as_label());

        let Some(toid) = completion.task.toid else {
            tracing::debug!(ttid = %completion.ttid, "completion without an owner");
            return;
        };
        let Some(order) = self.store.get_mut(toid) else {
            // The owner is gone (never created, or swept): nothing to update.
            tracing::debug!(%toid, ttid = %completion.ttid, "completion for unknown order");
            return;
        };

        // Decisions below use the gate as observed before this completion
        // mutates anything; a hook that reopens the gate through a second
        // handle only affects later completions.
        let gate = order.gate;
        order.apply_task_status(completion.ttid, completion.status);

        self.router
            .fire_task_hook(
                completion.ttid,
                &completion.task,
                completion.status,
                &completion.receipt,
            )
            .await;

        self.advance(toid, gate).await;
        self.store.record_task_event(toid, completion.ttid);
    }

    /// Evaluates the transition table until the order stops moving.
    ///
    /// Looping makes vacuous phases settle immediately: an order entering
    /// `Compensating` with nothing to compensate is `Aborted` in the same
    /// invocation, and a task-less closed order falls straight through to
    /// `Done`.
    async fn advance(&mut self, toid: OrderId, gate: Gate) {
        if gate.is_open() {
            return;
        }
        loop {
            let Some(order) = self.store.get(toid) else {
                return;
            };
            match order.status {
                OrderStatus::Preparing => match order.phase_outcome(Phase::Prepare) {
                    PhaseOutcome::Yes => self.enter_committing(toid),
                    PhaseOutcome::No => self.enter_compensating(toid),
                    PhaseOutcome::Doing => return,
                },
                OrderStatus::Committing => match order.phase_outcome(Phase::Commit) {
                    PhaseOutcome::Yes => {
                        self.settle(toid, OrderStatus::Done).await;
                        return;
                    }
                    PhaseOutcome::No => {
                        self.block(toid);
                        return;
                    }
                    PhaseOutcome::Doing => return,
                },
                OrderStatus::Compensating => match order.phase_outcome(Phase::Compensate) {
                    PhaseOutcome::Yes => {
                        self.settle(toid, OrderStatus::Aborted).await;
                        return;
                    }
                    PhaseOutcome::No => {
                        self.block(toid);
                        return;
                    }
                    PhaseOutcome::Doing => return,
                },
                OrderStatus::Todo
                | OrderStatus::Blocking
                | OrderStatus::Done
                | OrderStatus::Aborted => return,
            }
        }
    }

    /// Commit fan-out: push every participant's commit, record it, and
    /// promote its parked hook to the assigned id. Commits carry no
    /// prerequisite edges - they are independent under two-phase commit.
    fn enter_committing(&mut self, toid: OrderId) {
        let Some(order) = self.store.get(toid) else {
            return;
        };
        let specs: Vec<(TaskId, TaskRecord)> = order
            .tasks
            .iter()
            .map(|p| {
                let mut commit = p.commit.clone();
                commit.toid = Some(toid);
                commit.for_ttid = Some(p.ttid);
                (p.ttid, commit)
            })
            .collect();

        let mut records = Vec::with_capacity(specs.len());
        for (prepare_ttid, commit) in specs {
            let cid = self.actuator.push(commit.clone());
            self.router.promote_commit_hook(prepare_ttid, cid);
            records.push(CommitRecord {
                ttid: cid,
                commit,
                prepare_ttid,
                status: TaskStatus::Todo,
            });
        }

        if let Some(order) = self.store.get_mut(toid) {
            order.status = OrderStatus::Committing;
            order.commits.extend(records);
        }
        self.metrics
            .record_order_transition(OrderStatus::Committing.as_label());
        tracing::info!(%toid, "prepare phase succeeded, committing");
    }

    /// Compensate fan-out: push the undo call of every participant whose
    /// prepare settled `Done`. Participants that never prepared have
    /// nothing to undo.
    fn enter_compensating(&mut self, toid: OrderId) {
        let Some(order) = self.store.get(toid) else {
            return;
        };
        let specs: Vec<(TaskId, TaskRecord)> = order
            .tasks
            .iter()
            .filter(|p| p.status == TaskStatus::Done)
            .filter_map(|p| {
                p.comp.clone().map(|mut comp| {
                    comp.toid = Some(toid);
                    comp.for_ttid = Some(p.ttid);
                    (p.ttid, comp)
                })
            })
            .collect();

        let mut records = Vec::with_capacity(specs.len());
        for (for_ttid, comp) in specs {
            let tcid = self.actuator.push(comp.clone());
            records.push(CompensationRecord {
                for_ttid,
                tcid,
                comp,
                status: TaskStatus::Todo,
            });
        }

        if let Some(order) = self.store.get_mut(toid) {
            order.status = OrderStatus::Compensating;
            order.comps.extend(records);
        }
        self.metrics
            .record_order_transition(OrderStatus::Compensating.as_label());
        tracing::info!(%toid, "prepare phase failed, compensating");
    }

    /// Marks a failed commit or compensate phase for operator attention.
    fn block(&mut self, toid: OrderId) {
        if let Some(order) = self.store.get_mut(toid) {
            order.status = OrderStatus::Blocking;
        }
        self.metrics
            .record_order_transition(OrderStatus::Blocking.as_label());
        tracing::warn!(%toid, "order blocked, operator intervention required");
    }

    /// Settles an order: terminal status, registration purge, actuator
    /// cleanup, alive-set removal, then the order hook.
    async fn settle(&mut self, toid: OrderId, target: OrderStatus) {
        let Some(order) = self.store.get_mut(toid) else {
            return;
        };
        order.status = target;
        let registered = order.registered_ids();

        self.router.purge_task_entries(&registered);
        self.actuator.remove_by_order(toid);
        self.store.unmark_alive(toid);
        self.metrics.record_order_transition(target.as_label());
        self.metrics.set_alive_orders(self.store.alive_ids().len());
        tracing::info!(%toid, status = %target, "order settled");

        // All bookkeeping is done before the only suspension point here, so
        // the hook observes the settled order.
        let Some(snapshot) = self.store.get(toid).cloned() else {
            return;
        };
        let callback_status = self.router.fire_order_hook(toid, &snapshot).await;
        if let Some(status) = callback_status {
            if let Some(order) = self.store.get_mut(toid) {
                order.callback_status = Some(status);
            }
        }
    }

    // ------------------------------------------------------------------
    // Guards
    // ------------------------------------------------------------------

    /// The order, provided it exists and has not settled.
    fn guard(&self, toid: OrderId) -> Result<&Order> {
        let order = self.store.get(toid).ok_or(Error::OrderNotFound { toid })?;
        if order.is_terminal() {
            return Err(Error::OrderSettled {
                toid,
                status: order.status,
            });
        }
        Ok(order)
    }

    /// The order, provided it exists, has not settled, and is gated
    /// `Opening`.
    fn guard_open(&self, toid: OrderId) -> Result<&Order> {
        let order = self.guard(toid)?;
        if !order.gate.is_open() {
            return Err(Error::OrderClosed { toid });
        }
        Ok(order)
    }

    /// Mutable variant of [`TransactionManager::guard`].
    fn guard_mut(&mut self, toid: OrderId) -> Result<&mut Order> {
        self.guard(toid)?;
        self.store
            .get_mut(toid)
            .ok_or(Error::OrderNotFound { toid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CallOutcome, FnHandler, LocalDispatcher};
    use serde_json::json;

    fn manager() -> TransactionManager {
        let dispatcher = LocalDispatcher::new().with_handler(
            "ok",
            Arc::new(FnHandler::new(|_| CallOutcome::Ok(json!("done")))),
        );
        TransactionManager::new(Arc::new(dispatcher))
    }

    fn participant() -> ParticipantSpec {
        ParticipantSpec::new(TaskRecord::local("ok"), TaskRecord::local("ok"))
    }

    #[test]
    fn create_allocates_from_one() {
        let mut tm = manager();
        assert_eq!(tm.create(json!(null), None), OrderId::new(1));
        assert_eq!(tm.create(json!(null), None), OrderId::new(2));
        assert_eq!(tm.count(), 2);
        assert_eq!(tm.status(OrderId::new(1)), Some(OrderStatus::Todo));
    }

    #[test]
    fn push_requires_an_open_gate() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        tm.store.get_mut(toid).unwrap().gate = Gate::Closed;

        let err = tm.push(toid, participant(), None, None).unwrap_err();
        assert!(matches!(err, Error::OrderClosed { .. }));
    }

    #[test]
    fn push_to_unknown_order_fails() {
        let mut tm = manager();
        let err = tm
            .push(OrderId::new(9), participant(), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::OrderNotFound { .. }));
    }

    #[test]
    fn alive_set_tracks_participants() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        assert!(tm.alive_orders().is_empty());

        let ttid = tm.push(toid, participant(), None, None).unwrap();
        assert_eq!(tm.alive_orders(), vec![toid]);

        // Cancelling the only participant drains the alive set again.
        assert_eq!(tm.remove(toid, ttid), Some(ttid));
        assert!(tm.alive_orders().is_empty());
    }

    #[test]
    fn update_reassigns_the_prepare_id() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        let ttid = tm.push(toid, participant(), None, None).unwrap();

        let new_ttid = tm.update(toid, ttid, participant(), None, None).unwrap();
        assert_ne!(new_ttid, ttid);

        let order = tm.get_order(toid).unwrap();
        assert_eq!(order.tasks.len(), 1);
        assert_eq!(order.tasks[0].ttid, new_ttid);
        assert!(tm.actuator().queued(ttid).is_none());
        assert!(tm.actuator().queued(new_ttid).is_some());
    }

    #[test]
    fn update_unknown_participant_fails() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        let err = tm
            .update(toid, TaskId::new(42), participant(), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::ParticipantNotFound { .. }));
    }

    #[test]
    fn remove_rejects_closed_gate() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        let ttid = tm.push(toid, participant(), None, None).unwrap();
        tm.store.get_mut(toid).unwrap().gate = Gate::Closed;

        assert_eq!(tm.remove(toid, ttid), None);
    }

    #[tokio::test]
    async fn complete_rejects_non_terminal_target() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        let err = tm.complete(toid, OrderStatus::Blocking).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCompletionTarget { .. }));
    }

    #[tokio::test]
    async fn complete_requires_blocking() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        assert!(!tm.complete(toid, OrderStatus::Done).await.unwrap());
    }

    #[tokio::test]
    async fn open_rejects_mid_phase_orders() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        tm.push(toid, participant(), None, None).unwrap();
        tm.finish(toid).await.unwrap();
        tm.run(toid).await.unwrap();
        assert_eq!(tm.status(toid), Some(OrderStatus::Committing));

        let err = tm.open(toid).unwrap_err();
        assert!(matches!(err, Error::GateLocked { .. }));
    }

    #[test]
    fn append_comp_rejects_wrong_phase() {
        let mut tm = manager();
        let toid = tm.create(json!(null), None);
        tm.push(toid, participant(), None, None).unwrap();

        let err = tm
            .append_comp(toid, TaskId::new(1), TaskRecord::local("ok"), None)
            .unwrap_err();
        assert!(matches!(err, Error::CompensationRejected { .. }));
    }

    #[test]
    fn register_order_hook_requires_the_order() {
        let mut tm = manager();
        struct Noop;
        #[async_trait::async_trait]
        impl OrderHook for Noop {
            async fn on_order_complete(
                &self,
                _toid: OrderId,
                _order: &Order,
            ) -> crate::callbacks::HookResult {
                Ok(())
            }
        }
        let err = tm
            .register_order_hook(OrderId::new(5), Arc::new(Noop))
            .unwrap_err();
        assert!(matches!(err, Error::OrderNotFound { .. }));
    }
}
