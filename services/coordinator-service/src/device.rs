use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::storage::SnapshotStore;

/// A remote scanning device. Instance and account are weak references by
/// name; the device record survives both being deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub instance_name: Option<String>,
    pub account_username: Option<String>,
    pub last_host: Option<String>,
    pub last_seen: u64,
    pub last_lat: f64,
    pub last_lon: f64,
}

impl Device {
    fn new(uuid: String) -> Self {
        Self {
            uuid,
            instance_name: None,
            account_username: None,
            last_host: None,
            last_seen: 0,
            last_lat: 0.0,
            last_lon: 0.0,
        }
    }
}

/// In-memory device registry. The map is authoritative for reads on the hot
/// polling path; every mutation is snapshotted to the store.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
    store: Arc<SnapshotStore>,
}

impl DeviceRegistry {
    pub fn new(initial: Vec<Device>, store: Arc<SnapshotStore>) -> Self {
        let devices = initial
            .into_iter()
            .map(|device| (device.uuid.clone(), device))
            .collect();
        Self {
            devices: RwLock::new(devices),
            store,
        }
    }

    pub async fn get(&self, uuid: &str) -> Option<Device> {
        self.devices.read().await.get(uuid).cloned()
    }

    pub async fn all(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Idempotent: returns the existing record when present, else creates an
    /// unassigned one.
    pub async fn register(&self, uuid: &str) -> Device {
        let created;
        let device = {
            let mut devices = self.devices.write().await;
            match devices.get(uuid) {
                Some(existing) => {
                    created = false;
                    existing.clone()
                }
                None => {
                    created = true;
                    let device = Device::new(uuid.to_string());
                    devices.insert(uuid.to_string(), device.clone());
                    device
                }
            }
        };
        if created {
            self.persist().await;
        }
        device
    }

    /// Update last-seen bookkeeping. Unknown devices are logged and ignored
    /// so a stale client cannot fail a heartbeat loop.
    pub async fn touch(&self, uuid: &str, host: &str, last_seen_only: bool) {
        {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.get_mut(uuid) else {
                warn!(uuid, "touch for unknown device");
                return;
            };
            device.last_seen = Utc::now().timestamp() as u64;
            if !last_seen_only {
                device.last_host = Some(host.to_string());
            }
        }
        self.persist().await;
    }

    pub async fn set_location(&self, uuid: &str, lat: f64, lon: f64) {
        {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.get_mut(uuid) else {
                warn!(uuid, "location update for unknown device");
                return;
            };
            device.last_lat = lat;
            device.last_lon = lon;
        }
        self.persist().await;
    }

    /// Point the device at an instance (or clear it). The caller is
    /// responsible for rebinding the controller through the coordinator.
    pub async fn assign(&self, uuid: &str, instance_name: Option<&str>) {
        {
            let mut devices = self.devices.write().await;
            let device = devices
                .entry(uuid.to_string())
                .or_insert_with(|| Device::new(uuid.to_string()));
            device.instance_name = instance_name.map(str::to_string);
        }
        self.persist().await;
    }

    pub async fn set_account(&self, uuid: &str, username: Option<&str>) {
        {
            let mut devices = self.devices.write().await;
            let Some(device) = devices.get_mut(uuid) else {
                warn!(uuid, "account update for unknown device");
                return;
            };
            device.account_username = username.map(str::to_string);
        }
        self.persist().await;
    }

    /// Detach every device pointing at a removed instance.
    pub async fn clear_instance(&self, instance_name: &str) {
        {
            let mut devices = self.devices.write().await;
            for device in devices.values_mut() {
                if device.instance_name.as_deref() == Some(instance_name) {
                    device.instance_name = None;
                }
            }
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let snapshot: Vec<Device> = self.all().await;
        if let Err(err) = self.store.save_with_retry("devices", &snapshot).await {
            error!(error = %err, "device snapshot persist failed");
        }
    }
}
