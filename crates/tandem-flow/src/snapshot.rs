//! Snapshot and restore of all in-memory transaction-manager state.
//!
//! The manager holds no persistence of its own: the host owns durability
//! and calls [`crate::manager::TransactionManager::get_data`] /
//! [`crate::manager::TransactionManager::set_data`] around its own
//! upgrade or checkpoint machinery. The snapshot is deterministic - all
//! collections are exported in id order - so two snapshots of the same
//! state are byte-identical once serialized.
//!
//! Callback registrations are *not* part of the snapshot: they hold host
//! closures that cannot be serialized. After a restore only the default
//! hooks fire until the host re-registers per-id hooks.

use serde::{Deserialize, Serialize};

use crate::actuator::ActuatorSnapshot;
use crate::store::StoreSnapshot;

/// All transaction-manager state, ready for host-managed durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmSnapshot {
    /// Order store state: ids, orders, alive set, completion logs,
    /// retention.
    #[serde(flatten)]
    pub store: StoreSnapshot,
    /// Actuator state: queued tasks and completion events.
    pub actuator: ActuatorSnapshot,
}
