//! The order store: id allocation, retention, and the alive set.
//!
//! Orders live in a `BTreeMap` keyed by their dense, monotonically
//! allocated ids. Two cursors frame the live range: `next_id` (the next id
//! to allocate) and `first_index` (the smallest id that may still exist;
//! everything below it has been garbage collected). Retention is
//! time-based: settled orders are kept for inspection until they expire,
//! then [`OrderStore::sweep`] reclaims them from the bottom of the range.
//!
//! The store also owns two projections the manager maintains:
//!
//! - the **alive set**: ids of orders that have at least one participant
//!   and have not settled
//! - the **task-event log**: per order, the actuator ids that completed,
//!   in delivery order

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::{OrderId, TaskId};

use crate::order::Order;

/// How long settled orders are retained before they may be swept
/// (three months).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// One page of orders, 1-indexed over the live id range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    /// Orders present in the page's id slice.
    pub data: Vec<(OrderId, Order)>,
    /// Total number of pages over the live range.
    pub total_page: usize,
    /// Total number of id slots in the live range.
    pub total: usize,
}

/// Serializable store state for host-managed durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Retention window for settled orders.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Next order id to allocate.
    pub next_id: OrderId,
    /// Smallest id that may still exist.
    pub first_index: OrderId,
    /// All orders, ordered by id.
    pub orders: Vec<(OrderId, Order)>,
    /// The alive set.
    pub alive: Vec<OrderId>,
    /// Per-order completion logs.
    pub task_events: Vec<(OrderId, Vec<TaskId>)>,
}

/// In-memory order store with monotonic ids and a sliding GC cursor.
#[derive(Debug)]
pub struct OrderStore {
    next_id: OrderId,
    first_index: OrderId,
    orders: BTreeMap<OrderId, Order>,
    alive: BTreeSet<OrderId>,
    task_events: BTreeMap<OrderId, Vec<TaskId>>,
    retention: Duration,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    /// Creates an empty store; the first order will get id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: OrderId::new(1),
            first_index: OrderId::new(1),
            orders: BTreeMap::new(),
            alive: BTreeSet::new(),
            task_events: BTreeMap::new(),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Allocates an id and stores a fresh order under it.
    pub fn create(&mut self, data: serde_json::Value) -> OrderId {
        let toid = self.next_id;
        self.next_id = self.next_id.next();
        self.orders.insert(toid, Order::new(data));
        toid
    }

    /// Looks up an order.
    #[must_use]
    pub fn get(&self, toid: OrderId) -> Option<&Order> {
        self.orders.get(&toid)
    }

    /// Looks up an order, mutably.
    pub fn get_mut(&mut self, toid: OrderId) -> Option<&mut Order> {
        self.orders.get_mut(&toid)
    }

    /// Number of orders currently stored.
    #[must_use]
    pub fn count(&self) -> usize {
        self.orders.len()
    }

    /// Next id to allocate.
    #[must_use]
    pub fn next_id(&self) -> OrderId {
        self.next_id
    }

    /// Smallest id that may still exist.
    #[must_use]
    pub fn first_index(&self) -> OrderId {
        self.first_index
    }

    /// Retention window for settled orders.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Replaces the retention window.
    pub fn set_retention(&mut self, retention: Duration) {
        self.retention = retention;
    }

    /// Adds an order to the alive set.
    pub fn mark_alive(&mut self, toid: OrderId) {
        self.alive.insert(toid);
    }

    /// Removes an order from the alive set.
    pub fn unmark_alive(&mut self, toid: OrderId) {
        self.alive.remove(&toid);
    }

    /// Ids in the alive set, ascending.
    #[must_use]
    pub fn alive_ids(&self) -> Vec<OrderId> {
        self.alive.iter().copied().collect()
    }

    /// Appends a completed actuator id to an order's log.
    ///
    /// Unknown orders are ignored: a completion for an order that was never
    /// created (or was already swept) creates no state.
    pub fn record_task_event(&mut self, toid: OrderId, ttid: TaskId) {
        if self.orders.contains_key(&toid) {
            self.task_events.entry(toid).or_default().push(ttid);
        }
    }

    /// The completion log for an order, in delivery order.
    #[must_use]
    pub fn task_events(&self, toid: OrderId) -> Option<&[TaskId]> {
        self.task_events.get(&toid).map(Vec::as_slice)
    }

    /// Garbage-collects expired orders from the bottom of the id range.
    ///
    /// Sweeps `first_index` upward: empty slots are skipped; expired orders
    /// (`now > time + retention`) are deleted when settled, or
    /// unconditionally when `del_exc` is set. The sweep stops at the first
    /// order it may not delete, so `first_index` never jumps over a live
    /// order.
    pub fn sweep(&mut self, del_exc: bool) {
        let now = Utc::now();
        while self.first_index < self.next_id {
            match self.orders.get(&self.first_index) {
                None => self.first_index = self.first_index.next(),
                Some(order) => {
                    let expired = now > expires_at(order.time, self.retention);
                    let deletable = del_exc || order.is_terminal();
                    if expired && deletable {
                        self.orders.remove(&self.first_index);
                        self.task_events.remove(&self.first_index);
                        self.alive.remove(&self.first_index);
                        self.first_index = self.first_index.next();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// Returns one page of orders over the live id range `[first_index,
    /// next_id)`. Pages are 1-indexed; swept slots inside a page simply
    /// contribute no data.
    #[must_use]
    pub fn page(&self, page: usize, size: usize) -> OrderPage {
        let total = usize::try_from(self.next_id.value() - self.first_index.value())
            .unwrap_or(usize::MAX);
        if size == 0 || page == 0 {
            return OrderPage {
                data: Vec::new(),
                total_page: 0,
                total,
            };
        }
        let total_page = total.div_ceil(size);
        let start = self.first_index.value() + ((page - 1) * size) as u64;
        let end = (start + size as u64).min(self.next_id.value());
        let data = (start..end)
            .map(OrderId::new)
            .filter_map(|toid| self.orders.get(&toid).map(|o| (toid, o.clone())))
            .collect();
        OrderPage {
            data,
            total_page,
            total,
        }
    }

    /// Captures all store state for host-managed durability.
    #[must_use]
    pub fn export(&self) -> StoreSnapshot {
        StoreSnapshot {
            retention: self.retention,
            next_id: self.next_id,
            first_index: self.first_index,
            orders: self.orders.iter().map(|(k, v)| (*k, v.clone())).collect(),
            alive: self.alive_ids(),
            task_events: self
                .task_events
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    /// Replaces all store state from a snapshot.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.retention = snapshot.retention;
        self.next_id = snapshot.next_id;
        self.first_index = snapshot.first_index;
        self.orders = snapshot.orders.into_iter().collect();
        self.alive = snapshot.alive.into_iter().collect();
        self.task_events = snapshot.task_events.into_iter().collect();
    }
}

/// Adds a duration to an instant, saturating at the far future.
fn expires_at(from: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
