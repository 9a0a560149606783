use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    add_accounts, assign_device, control, create_assignment, create_instance, delete_all_assignments,
    delete_assignment, delete_instance, healthz, list_assignments, list_devices, list_instances,
    raw, readyz, start_assignment, status, update_instance,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Device-facing endpoints; the path spelling is what clients ship with.
        .route("/controler", post(control))
        .route("/raw", post(raw))
        .route("/v1/status", get(status))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/:uuid/assign", post(assign_device))
        .route("/v1/instances", get(list_instances))
        .route("/v1/instances", post(create_instance))
        .route("/v1/instances/:name", put(update_instance))
        .route("/v1/instances/:name", delete(delete_instance))
        .route("/v1/assignments", get(list_assignments))
        .route("/v1/assignments", post(create_assignment))
        .route("/v1/assignments", delete(delete_all_assignments))
        .route("/v1/assignments/delete", post(delete_assignment))
        .route("/v1/assignments/start", post(start_assignment))
        .route("/v1/accounts", post(add_accounts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
