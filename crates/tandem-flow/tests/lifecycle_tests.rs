//! End-to-end lifecycle tests driving the full manager + actuator stack
//! through a scripted in-process dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use tandem_flow::callbacks::HookResult;
use tandem_flow::prelude::*;

/// Builds a dispatcher where each callee deterministically succeeds or
/// fails.
fn dispatcher(routes: &[(&str, bool)]) -> Arc<LocalDispatcher> {
    let mut local = LocalDispatcher::new();
    for (callee, succeeds) in routes {
        let succeeds = *succeeds;
        let name = (*callee).to_string();
        local.register(
            *callee,
            Arc::new(FnHandler::new(move |_| {
                if succeeds {
                    CallOutcome::Ok(json!({ "callee": name }))
                } else {
                    CallOutcome::Failed(json!({ "callee": name, "error": "refused" }))
                }
            })),
        );
    }
    Arc::new(local)
}

/// A prepare/commit task that retries immediately and once only.
fn call(callee: &str) -> TaskRecord {
    TaskRecord::local(callee)
        .with_recall_interval(Duration::ZERO)
        .with_attempts_max(1)
}

/// Drives the actuator until no pass settles anything new.
async fn run_to_quiescence(tm: &mut TransactionManager, toid: OrderId) -> Result<()> {
    loop {
        if tm.run(toid).await? == 0 {
            break;
        }
    }
    Ok(())
}

/// Records order terminalizations.
struct OrderProbe {
    seen: Mutex<Vec<(OrderId, OrderStatus)>>,
    fail: bool,
}

impl OrderProbe {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }
}

#[async_trait]
impl OrderHook for OrderProbe {
    async fn on_order_complete(&self, toid: OrderId, order: &Order) -> HookResult {
        self.seen.lock().unwrap().push((toid, order.status));
        if self.fail {
            return Err("order hook refused".into());
        }
        Ok(())
    }
}

/// Records task completions.
struct TaskProbe {
    seen: Mutex<Vec<(TaskId, TaskStatus)>>,
}

impl TaskProbe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TaskHook for TaskProbe {
    async fn on_task_complete(
        &self,
        ttid: TaskId,
        _task: &TaskRecord,
        status: TaskStatus,
        _receipt: &serde_json::Value,
    ) -> HookResult {
        self.seen.lock().unwrap().push((ttid, status));
        Ok(())
    }
}

#[tokio::test]
async fn happy_path_commits_both_participants() -> Result<()> {
    let routes = [("p1", true), ("p2", true), ("c1", true), ("c2", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!({"ref": "ord-1"}), None);
    assert_eq!(toid, OrderId::new(1));

    let t1 = tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    let t2 = tm.push(
        toid,
        ParticipantSpec::new(call("p2"), call("c2")),
        None,
        None,
    )?;
    assert_eq!((t1, t2), (TaskId::new(1), TaskId::new(2)));

    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(tm.status(toid), Some(OrderStatus::Done));
    assert!(tm.is_completed(toid));
    assert!(tm.alive_orders().is_empty());
    assert_eq!(tm.actuator().pending_for_order(toid), 0);

    // Two prepares and two commits completed, prepares first.
    let events = tm.task_events(toid).expect("events recorded");
    assert_eq!(events.len(), 4);
    assert_eq!(&events[..2], &[t1, t2]);

    // Every commit record settled.
    let order = tm.get_order(toid).expect("order retained");
    assert!(order.commits.iter().all(|c| c.status == TaskStatus::Done));
    assert_eq!(tm.phase_outcome(toid, Phase::Prepare), Some(PhaseOutcome::Yes));
    assert_eq!(tm.phase_outcome(toid, Phase::Commit), Some(PhaseOutcome::Yes));
    Ok(())
}

#[tokio::test]
async fn failed_prepare_compensates_only_prepared_participants() -> Result<()> {
    let routes = [
        ("p1", true),
        ("p2", false),
        ("c1", true),
        ("c2", true),
        ("undo1", true),
    ];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    let t1 = tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")).with_compensation(call("undo1")),
        None,
        None,
    )?;
    // Participant 2 has a compensation too; it must never be pushed because
    // its prepare never succeeds.
    let _t2 = tm.push(
        toid,
        ParticipantSpec::new(call("p2").with_attempts_max(2), call("c2"))
            .with_compensation(call("undo2")),
        None,
        None,
    )?;
    tm.finish(toid).await?;

    // Pass 1: p1 succeeds, p2 burns attempt 1 of 2.
    tm.run(toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Preparing));

    // Pass 2: p2 exhausts its retry budget and the order flips to
    // compensating, queueing undo work for participant 1 only.
    tm.run(toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Compensating));
    {
        let order = tm.get_order(toid).expect("order");
        assert_eq!(order.comps.len(), 1);
        assert_eq!(order.comps[0].for_ttid, t1);
    }

    run_to_quiescence(&mut tm, toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Aborted));
    assert_eq!(
        tm.phase_outcome(toid, Phase::Compensate),
        Some(PhaseOutcome::Yes)
    );
    assert!(tm.alive_orders().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_commit_blocks_until_operator_recovers() -> Result<()> {
    let routes = [
        ("p1", true),
        ("p2", true),
        ("c1", true),
        ("c2", false),
        ("fix", true),
    ];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    let t2 = tm.push(
        toid,
        ParticipantSpec::new(call("p2"), call("c2")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(tm.status(toid), Some(OrderStatus::Blocking));

    // The commit phase still reads No, so Done cannot be forced.
    assert!(!tm.complete(toid, OrderStatus::Done).await?);
    assert_eq!(tm.status(toid), Some(OrderStatus::Blocking));

    // Operator injects undo work for the participant whose commit failed,
    // lets it settle, then forces the order aborted.
    tm.append_comp(toid, t2, call("fix"), None)?;
    run_to_quiescence(&mut tm, toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Blocking));

    assert!(tm.complete(toid, OrderStatus::Aborted).await?);
    assert_eq!(tm.status(toid), Some(OrderStatus::Aborted));
    assert!(tm.alive_orders().is_empty());
    assert_eq!(tm.actuator().pending_for_order(toid), 0);
    Ok(())
}

#[tokio::test]
async fn removed_participant_is_not_consulted() -> Result<()> {
    let routes = [("p1", true), ("p3", true), ("c1", true), ("c3", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    let t1 = tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    // Participant 2's callee has no handler: were it consulted, the prepare
    // phase would fail and the order would never commit.
    let t2 = tm.push(
        toid,
        ParticipantSpec::new(call("p2"), call("c2")),
        None,
        None,
    )?;
    let t3 = tm.push(
        toid,
        ParticipantSpec::new(call("p3"), call("c3")),
        None,
        None,
    )?;

    assert_eq!(tm.remove(toid, t2), Some(t2));
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(tm.status(toid), Some(OrderStatus::Done));
    let order = tm.get_order(toid).expect("order");
    let ids: Vec<TaskId> = order.tasks.iter().map(|p| p.ttid).collect();
    assert_eq!(ids, vec![t1, t3]);
    Ok(())
}

#[tokio::test]
async fn retention_gc_reclaims_settled_orders() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Done));

    // Settled orders survive a sweep while retention covers them.
    tm.clear(false);
    assert!(tm.get_order(toid).is_some());

    // Shrink retention to nothing: the next sweep reclaims the order and
    // slides the window past it.
    tm.set_cache_expiration(Duration::ZERO);
    tm.clear(false);
    assert!(tm.get_order(toid).is_none());
    assert!(tm.task_events(toid).is_none());
    assert_eq!(tm.get_data().store.first_index, toid.next());

    // Idempotent with nothing newly expired.
    tm.clear(false);
    assert_eq!(tm.get_data().store.first_index, toid.next());
    Ok(())
}

#[tokio::test]
async fn snapshot_restore_resumes_mid_flight() -> Result<()> {
    let routes = [("p1", true), ("p2", true), ("c1", true), ("c2", true)];
    let source = dispatcher(&routes);
    let mut tm = TransactionManager::new(Arc::clone(&source) as Arc<dyn CallDispatcher>);

    let toid = tm.create(json!({"ref": "ord-1"}), None);
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.push(
        toid,
        ParticipantSpec::new(call("p2"), call("c2")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    // One pass: prepares settle, commits are queued but not yet run.
    tm.run(toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Committing));

    let snapshot = tm.get_data();

    let mut restored = TransactionManager::new(source as Arc<dyn CallDispatcher>);
    restored.set_data(snapshot);

    assert_eq!(restored.status(toid), tm.status(toid));
    assert_eq!(restored.alive_orders(), tm.alive_orders());
    assert_eq!(restored.task_events(toid), tm.task_events(toid));
    assert_eq!(
        restored.actuator().pending_for_order(toid),
        tm.actuator().pending_for_order(toid)
    );

    // The restored manager picks up exactly where the original stopped.
    run_to_quiescence(&mut restored, toid).await?;
    assert_eq!(restored.status(toid), Some(OrderStatus::Done));
    Ok(())
}

#[tokio::test]
async fn finish_after_prepares_settled_still_advances() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;

    // The prepare settles while the gate is still open: no verdict may be
    // taken yet.
    tm.run(toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Preparing));

    // Closing the gate is the event that lets the settled phase take
    // effect.
    tm.finish(toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Committing));

    run_to_quiescence(&mut tm, toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Done));
    Ok(())
}

#[tokio::test]
async fn finish_is_idempotent() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let toid = tm.create(json!(null), None);
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    tm.finish(toid).await?;

    run_to_quiescence(&mut tm, toid).await?;
    assert_eq!(tm.status(toid), Some(OrderStatus::Done));
    Ok(())
}

#[tokio::test]
async fn order_hook_fires_once_and_sets_callback_status() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let probe = OrderProbe::new(false);
    let toid = tm.create(json!(null), Some(probe.clone()));
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(
        *probe.seen.lock().unwrap(),
        vec![(toid, OrderStatus::Done)]
    );
    let order = tm.get_order(toid).expect("order");
    assert_eq!(order.callback_status, Some(TaskStatus::Done));
    Ok(())
}

#[tokio::test]
async fn failing_order_hook_is_recorded_not_fatal() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let probe = OrderProbe::new(true);
    let toid = tm.create(json!(null), Some(probe));
    tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(tm.status(toid), Some(OrderStatus::Done));
    let order = tm.get_order(toid).expect("order");
    assert_eq!(order.callback_status, Some(TaskStatus::Error));
    Ok(())
}

#[tokio::test]
async fn commit_hook_parked_at_push_fires_for_the_commit() -> Result<()> {
    let routes = [("p1", true), ("c1", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let prepare_probe = TaskProbe::new();
    let commit_probe = TaskProbe::new();
    let toid = tm.create(json!(null), None);
    let t1 = tm.push(
        toid,
        ParticipantSpec::new(call("p1"), call("c1")),
        Some(prepare_probe.clone()),
        Some(commit_probe.clone()),
    )?;
    tm.finish(toid).await?;
    run_to_quiescence(&mut tm, toid).await?;

    assert_eq!(
        *prepare_probe.seen.lock().unwrap(),
        vec![(t1, TaskStatus::Done)]
    );
    // The parked hook was re-keyed to the commit's id at fan-out.
    let commit_ttid = tm.get_order(toid).expect("order").commits[0].ttid;
    assert_eq!(
        *commit_probe.seen.lock().unwrap(),
        vec![(commit_ttid, TaskStatus::Done)]
    );
    Ok(())
}

#[tokio::test]
async fn orders_share_one_actuator() -> Result<()> {
    let routes = [("p1", true), ("c1", true), ("p2", true), ("c2", true)];
    let mut tm = TransactionManager::new(dispatcher(&routes));

    let first = tm.create(json!(null), None);
    let second = tm.create(json!(null), None);
    tm.push(
        first,
        ParticipantSpec::new(call("p1"), call("c1")),
        None,
        None,
    )?;
    tm.push(
        second,
        ParticipantSpec::new(call("p2"), call("c2")),
        None,
        None,
    )?;
    tm.finish(first).await?;
    tm.finish(second).await?;

    // Driving the first order's run also executes the second order's
    // tasks; every completion is proxied to the order owning it.
    run_to_quiescence(&mut tm, first).await?;
    assert_eq!(tm.status(first), Some(OrderStatus::Done));
    assert_eq!(tm.status(second), Some(OrderStatus::Done));
    assert!(tm.alive_orders().is_empty());
    Ok(())
}

#[tokio::test]
async fn pagination_reports_the_live_range() -> Result<()> {
    let mut tm = TransactionManager::new(dispatcher(&[]));
    for _ in 0..3 {
        tm.create(json!(null), None);
    }

    let page = tm.get_orders(1, 2);
    assert_eq!(page.total, 3);
    assert_eq!(page.total_page, 2);
    assert_eq!(page.data.len(), 2);

    let page = tm.get_orders(2, 2);
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].0, OrderId::new(3));
    Ok(())
}
