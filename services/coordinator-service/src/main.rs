mod account;
mod app;
mod controllers;
mod coordinator;
mod decoder;
mod device;
mod geo;
mod handlers;
mod ingest;
mod instance;
mod models;
mod scheduler;
mod service;
mod state;
mod storage;
mod world;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use scanmap_common::{bind_listener, env_or, init_tracing, shutdown_signal};

use crate::account::{Account, AccountPool};
use crate::coordinator::Coordinator;
use crate::device::{Device, DeviceRegistry};
use crate::instance::Instance;
use crate::scheduler::{Assignment, AssignmentScheduler};
use crate::state::AppState;
use crate::storage::SnapshotStore;
use crate::world::WorldStore;

#[tokio::main]
async fn main() {
    let _guards = init_tracing("coordinator-service");

    let port = env_or("PORT", 8080u16);
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let tick_ms = env_or("SCHEDULER_TICK_MS", 1000u64);
    let timezone_offset = env_or("TIMEZONE_OFFSET", 0i32);
    let target_max_distance = env_or("TARGET_MAX_DISTANCE", 250.0f64);

    let store = Arc::new(SnapshotStore::new(&data_dir));
    let instances: Vec<Instance> = store.load("instances").await.expect("load instances");
    let devices_snapshot: Vec<Device> = store.load("devices").await.expect("load devices");
    let accounts_snapshot: Vec<Account> = store.load("accounts").await.expect("load accounts");
    let assignments: Vec<Assignment> = store.load("assignments").await.expect("load assignments");

    let (complete_tx, complete_rx) = tokio::sync::mpsc::unbounded_channel();
    let coordinator = Arc::new(Coordinator::new(complete_tx));
    for instance in instances {
        if let Err(err) = coordinator.add_instance(instance).await {
            tracing::error!(error = %err, "skipping invalid instance from snapshot");
        }
    }

    let devices = Arc::new(DeviceRegistry::new(devices_snapshot, Arc::clone(&store)));
    // Rebind controllers for devices that were assigned before the restart.
    for device in devices.all().await {
        if let Some(name) = device.instance_name.as_deref() {
            if !coordinator.reload_device(&device.uuid, Some(name)).await {
                tracing::warn!(uuid = %device.uuid, instance = name, "device bound to missing instance");
            }
        }
    }

    let accounts = Arc::new(AccountPool::new(accounts_snapshot, Arc::clone(&store)));
    let world = Arc::new(WorldStore::new());
    let scheduler = Arc::new(AssignmentScheduler::new(
        assignments,
        Arc::clone(&devices),
        Arc::clone(&coordinator),
        Arc::clone(&store),
        timezone_offset,
    ));
    tokio::spawn(Arc::clone(&scheduler).run(Duration::from_millis(tick_ms), complete_rx));

    let state = AppState {
        coordinator,
        devices,
        accounts,
        world,
        scheduler,
        store,
        target_max_distance,
    };

    let app = app::build_router(state);
    let listener = bind_listener(port).await;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("serve");
}
