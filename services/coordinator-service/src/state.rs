use std::sync::Arc;

use crate::account::AccountPool;
use crate::coordinator::Coordinator;
use crate::device::DeviceRegistry;
use crate::scheduler::AssignmentScheduler;
use crate::storage::SnapshotStore;
use crate::world::WorldStore;

/// Shared handles for the HTTP layer. Cloning is cheap; every field is an
/// Arc over the actual state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub devices: Arc<DeviceRegistry>,
    pub accounts: Arc<AccountPool>,
    pub world: Arc<WorldStore>,
    pub scheduler: Arc<AssignmentScheduler>,
    pub store: Arc<SnapshotStore>,
    /// Default radius in meters for the in-area check on raw uploads.
    pub target_max_distance: f64,
}
