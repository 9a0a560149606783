use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::info;

use crate::controllers::{self, BuildError, Sighting, TaskController};
use crate::instance::Instance;

struct Entry {
    instance: Instance,
    controller: Arc<dyn TaskController>,
}

/// Owns the live task controllers and the device-to-controller bindings.
/// Controllers are immutable once built; editing an instance builds a fresh
/// controller, migrates pending work, and atomically swaps the Arc so devices
/// mid-poll finish against the old one.
pub struct Coordinator {
    entries: RwLock<HashMap<String, Entry>>,
    bindings: RwLock<HashMap<String, Arc<dyn TaskController>>>,
    complete_tx: mpsc::UnboundedSender<String>,
}

impl Coordinator {
    pub fn new(complete_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            complete_tx,
        }
    }

    pub async fn add_instance(&self, instance: Instance) -> Result<(), BuildError> {
        let controller = controllers::build(&instance, self.complete_tx.clone())?;
        info!(instance = %instance.name, kind = instance.kind.label(), "instance loaded");
        self.entries.write().await.insert(
            instance.name.clone(),
            Entry {
                instance,
                controller,
            },
        );
        Ok(())
    }

    pub async fn remove_instance(&self, name: &str) -> bool {
        let removed = self.entries.write().await.remove(name).is_some();
        if removed {
            self.bindings
                .write()
                .await
                .retain(|_, controller| controller.name() != name);
            info!(instance = name, "instance removed");
        }
        removed
    }

    /// Rebuild the controller for an edited instance. Pending sightings from
    /// the old controller are re-offered to the new one, which applies its
    /// own filters, then every bound device is flipped to the replacement.
    pub async fn reload_instance(&self, instance: Instance) -> Result<bool, BuildError> {
        let name = instance.name.clone();
        let controller = controllers::build(&instance, self.complete_tx.clone())?;
        let replaced = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&name) else {
                return Ok(false);
            };
            for sighting in entry.controller.drain_pending() {
                controller.offer_sighting(&sighting);
            }
            entry.instance = instance;
            entry.controller = Arc::clone(&controller);
            true
        };
        if replaced {
            let mut bindings = self.bindings.write().await;
            for bound in bindings.values_mut() {
                if bound.name() == name {
                    *bound = Arc::clone(&controller);
                }
            }
            info!(instance = %name, "instance reloaded");
        }
        Ok(replaced)
    }

    /// Point a device at an instance's controller, or unbind it.
    pub async fn reload_device(&self, uuid: &str, instance_name: Option<&str>) -> bool {
        match instance_name {
            Some(name) => {
                let controller = {
                    let entries = self.entries.read().await;
                    entries.get(name).map(|e| Arc::clone(&e.controller))
                };
                match controller {
                    Some(controller) => {
                        self.bindings
                            .write()
                            .await
                            .insert(uuid.to_string(), controller);
                        true
                    }
                    None => false,
                }
            }
            None => {
                self.bindings.write().await.remove(uuid);
                true
            }
        }
    }

    pub async fn controller_for_device(&self, uuid: &str) -> Option<Arc<dyn TaskController>> {
        self.bindings.read().await.get(uuid).map(Arc::clone)
    }

    pub async fn controller_for_instance(&self, name: &str) -> Option<Arc<dyn TaskController>> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| Arc::clone(&e.controller))
    }

    pub async fn instances(&self) -> Vec<Instance> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.instance.clone())
            .collect()
    }

    pub async fn instance(&self, name: &str) -> Option<Instance> {
        self.entries.read().await.get(name).map(|e| e.instance.clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn instance_status(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| e.controller.status())
    }

    /// Fan a sighting out to every controller; each applies its own
    /// allow-list and geofence filters.
    pub async fn offer_sighting(&self, sighting: &Sighting) {
        let entries = self.entries.read().await;
        for entry in entries.values() {
            entry.controller.offer_sighting(sighting);
        }
    }
}
