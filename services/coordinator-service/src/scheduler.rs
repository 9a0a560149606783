use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::coordinator::Coordinator;
use crate::device::DeviceRegistry;
use crate::storage::SnapshotStore;

/// A scheduled device switch. `time` is seconds since local midnight; zero
/// means the assignment fires when the device's current instance reports
/// completion instead of at a wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub seq: u64,
    pub instance_name: String,
    pub device_uuid: String,
    pub time: u32,
    pub enabled: bool,
}

/// Seconds since local midnight for the configured offset.
pub fn current_tod(offset: i32) -> u32 {
    ((Utc::now().timestamp() + offset as i64).rem_euclid(86_400)) as u32
}

/// Time-of-day assignment scheduler. A single tick loop owns the assignment
/// list; the lock is held across firing so a delete observed mid-tick cannot
/// fire afterwards.
pub struct AssignmentScheduler {
    assignments: Mutex<Vec<Assignment>>,
    next_seq: AtomicU64,
    devices: Arc<DeviceRegistry>,
    coordinator: Arc<Coordinator>,
    store: Arc<SnapshotStore>,
    timezone_offset: i32,
}

impl AssignmentScheduler {
    pub fn new(
        initial: Vec<Assignment>,
        devices: Arc<DeviceRegistry>,
        coordinator: Arc<Coordinator>,
        store: Arc<SnapshotStore>,
        timezone_offset: i32,
    ) -> Self {
        let next_seq = initial.iter().map(|a| a.seq).max().unwrap_or(0) + 1;
        Self {
            assignments: Mutex::new(initial),
            next_seq: AtomicU64::new(next_seq),
            devices,
            coordinator,
            store,
            timezone_offset,
        }
    }

    pub async fn list(&self) -> Vec<Assignment> {
        self.assignments.lock().await.clone()
    }

    pub async fn add(
        &self,
        instance_name: String,
        device_uuid: String,
        time: u32,
        enabled: bool,
    ) -> Assignment {
        let assignment = Assignment {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            instance_name,
            device_uuid,
            time,
            enabled,
        };
        {
            let mut assignments = self.assignments.lock().await;
            assignments.push(assignment.clone());
            self.persist(&assignments).await;
        }
        assignment
    }

    /// Delete by exact (instance, device, time) triple, matching how the
    /// admin surface addresses assignments.
    pub async fn delete(&self, instance_name: &str, device_uuid: &str, time: u32) -> bool {
        let mut assignments = self.assignments.lock().await;
        let before = assignments.len();
        assignments.retain(|a| {
            !(a.instance_name == instance_name && a.device_uuid == device_uuid && a.time == time)
        });
        let removed = assignments.len() != before;
        if removed {
            self.persist(&assignments).await;
        }
        removed
    }

    pub async fn delete_all(&self) {
        let mut assignments = self.assignments.lock().await;
        assignments.clear();
        self.persist(&assignments).await;
    }

    /// Drop every assignment referencing a removed instance.
    pub async fn clear_instance(&self, instance_name: &str) {
        let mut assignments = self.assignments.lock().await;
        let before = assignments.len();
        assignments.retain(|a| a.instance_name != instance_name);
        if assignments.len() != before {
            self.persist(&assignments).await;
        }
    }

    /// Fire one assignment immediately, regardless of its time.
    pub async fn start(&self, instance_name: &str, device_uuid: &str, time: u32) -> bool {
        let found = {
            let assignments = self.assignments.lock().await;
            assignments.iter().any(|a| {
                a.instance_name == instance_name && a.device_uuid == device_uuid && a.time == time
            })
        };
        if found {
            self.fire(instance_name, device_uuid).await;
        }
        found
    }

    /// One scheduler pass for the given time of day. Later-created
    /// assignments win when several target the same device in one tick.
    pub async fn tick(&self, now_tod: u32) {
        let assignments = self.assignments.lock().await;
        let mut due: Vec<&Assignment> = assignments
            .iter()
            .filter(|a| a.enabled && a.time != 0 && a.time == now_tod)
            .collect();
        due.sort_by_key(|a| a.seq);
        for assignment in due {
            info!(
                instance = %assignment.instance_name,
                device = %assignment.device_uuid,
                time = assignment.time,
                "assignment due"
            );
            self.fire(&assignment.instance_name, &assignment.device_uuid)
                .await;
        }
    }

    /// An instance finished its run; fire the on-complete assignments of
    /// every device currently working that instance.
    pub async fn on_complete(&self, instance_name: &str) {
        let assignments = self.assignments.lock().await;
        let due: Vec<Assignment> = assignments
            .iter()
            .filter(|a| a.enabled && a.time == 0)
            .cloned()
            .collect();
        drop(assignments);
        for assignment in due {
            let current = self
                .devices
                .get(&assignment.device_uuid)
                .await
                .and_then(|d| d.instance_name);
            if current.as_deref() == Some(instance_name) {
                info!(
                    instance = %assignment.instance_name,
                    device = %assignment.device_uuid,
                    completed = instance_name,
                    "on-complete assignment due"
                );
                self.fire(&assignment.instance_name, &assignment.device_uuid)
                    .await;
            }
        }
    }

    async fn fire(&self, instance_name: &str, device_uuid: &str) {
        self.devices.assign(device_uuid, Some(instance_name)).await;
        if !self
            .coordinator
            .reload_device(device_uuid, Some(instance_name))
            .await
        {
            warn!(
                instance = instance_name,
                device = device_uuid,
                "assignment fired for unknown instance"
            );
        }
    }

    /// Scheduler loop: ticks at the configured interval, deduplicating by
    /// time of day so a slow tick cannot fire the same second twice, and
    /// drains instance-completion events between ticks.
    pub async fn run(
        self: Arc<Self>,
        tick_interval: Duration,
        mut complete_rx: mpsc::UnboundedReceiver<String>,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        let mut last_tod = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_tod = current_tod(self.timezone_offset);
                    if last_tod == Some(now_tod) {
                        continue;
                    }
                    last_tod = Some(now_tod);
                    self.tick(now_tod).await;
                }
                event = complete_rx.recv() => {
                    match event {
                        Some(instance_name) => self.on_complete(&instance_name).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn persist(&self, assignments: &[Assignment]) {
        if let Err(err) = self
            .store
            .save_with_retry("assignments", &assignments.to_vec())
            .await
        {
            error!(error = %err, "assignment snapshot persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coord;
    use crate::instance::{Area, Instance, InstanceData, InstanceType};
    use uuid::Uuid;

    fn instance(name: &str) -> Instance {
        Instance {
            name: name.to_string(),
            kind: InstanceType::CirclePokemon,
            data: InstanceData {
                area: Some(Area::Single(vec![Coord::new(1.0, 1.0)])),
                ..InstanceData::default()
            },
        }
    }

    async fn scheduler() -> (Arc<AssignmentScheduler>, Arc<DeviceRegistry>, Arc<Coordinator>) {
        let store = Arc::new(SnapshotStore::new(
            std::env::temp_dir().join(format!("scanmap-{}", Uuid::new_v4())),
        ));
        let devices = Arc::new(DeviceRegistry::new(Vec::new(), Arc::clone(&store)));
        let (tx, _rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Coordinator::new(tx));
        coordinator.add_instance(instance("day")).await.unwrap();
        coordinator.add_instance(instance("night")).await.unwrap();
        let scheduler = Arc::new(AssignmentScheduler::new(
            Vec::new(),
            Arc::clone(&devices),
            Arc::clone(&coordinator),
            store,
            0,
        ));
        (scheduler, devices, coordinator)
    }

    #[tokio::test]
    async fn tick_fires_matching_time_only() {
        let (scheduler, devices, _) = scheduler().await;
        devices.register("dev1").await;
        scheduler
            .add("night".to_string(), "dev1".to_string(), 3600, true)
            .await;

        scheduler.tick(100).await;
        assert!(devices.get("dev1").await.unwrap().instance_name.is_none());

        scheduler.tick(3600).await;
        assert_eq!(
            devices.get("dev1").await.unwrap().instance_name.as_deref(),
            Some("night")
        );
    }

    #[tokio::test]
    async fn disabled_assignments_never_fire() {
        let (scheduler, devices, _) = scheduler().await;
        devices.register("dev1").await;
        scheduler
            .add("night".to_string(), "dev1".to_string(), 3600, false)
            .await;
        scheduler.tick(3600).await;
        assert!(devices.get("dev1").await.unwrap().instance_name.is_none());
    }

    #[tokio::test]
    async fn later_assignment_wins_same_tick() {
        let (scheduler, devices, _) = scheduler().await;
        devices.register("dev1").await;
        scheduler
            .add("day".to_string(), "dev1".to_string(), 3600, true)
            .await;
        scheduler
            .add("night".to_string(), "dev1".to_string(), 3600, true)
            .await;
        scheduler.tick(3600).await;
        assert_eq!(
            devices.get("dev1").await.unwrap().instance_name.as_deref(),
            Some("night")
        );
    }

    #[tokio::test]
    async fn on_complete_fires_for_devices_on_that_instance() {
        let (scheduler, devices, coordinator) = scheduler().await;
        devices.register("dev1").await;
        devices.assign("dev1", Some("day")).await;
        coordinator.reload_device("dev1", Some("day")).await;
        devices.register("dev2").await;
        devices.assign("dev2", Some("night")).await;

        scheduler
            .add("night".to_string(), "dev1".to_string(), 0, true)
            .await;
        scheduler
            .add("day".to_string(), "dev2".to_string(), 0, true)
            .await;

        scheduler.on_complete("day").await;
        assert_eq!(
            devices.get("dev1").await.unwrap().instance_name.as_deref(),
            Some("night")
        );
        // dev2 was on "night", which did not complete.
        assert_eq!(
            devices.get("dev2").await.unwrap().instance_name.as_deref(),
            Some("night")
        );
    }

    #[tokio::test]
    async fn deleted_assignment_does_not_fire() {
        let (scheduler, devices, _) = scheduler().await;
        devices.register("dev1").await;
        scheduler
            .add("night".to_string(), "dev1".to_string(), 3600, true)
            .await;
        assert!(scheduler.delete("night", "dev1", 3600).await);
        scheduler.tick(3600).await;
        assert!(devices.get("dev1").await.unwrap().instance_name.is_none());
    }

    #[tokio::test]
    async fn start_fires_regardless_of_time() {
        let (scheduler, devices, _) = scheduler().await;
        devices.register("dev1").await;
        scheduler
            .add("night".to_string(), "dev1".to_string(), 3600, true)
            .await;
        assert!(scheduler.start("night", "dev1", 3600).await);
        assert_eq!(
            devices.get("dev1").await.unwrap().instance_name.as_deref(),
            Some("night")
        );
        assert!(!scheduler.start("ghost", "dev1", 3600).await);
    }

    #[test]
    fn current_tod_stays_in_day_range() {
        for offset in [-43_200, 0, 43_200] {
            let tod = current_tod(offset);
            assert!(tod < 86_400);
        }
    }
}
