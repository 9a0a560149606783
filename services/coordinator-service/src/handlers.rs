use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::instance::Instance;
use crate::models::{
    AddAccountsRequest, AssignDeviceRequest, AssignmentList, AssignmentRequest, DeviceList,
    RawRequest,
};
use crate::service::ServiceError;
use crate::state::AppState;
use crate::{ingest, service};

fn error_response(err: ServiceError) -> Response {
    (err.status, Json(err.body)).into_response()
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz(State(_state): State<AppState>) -> StatusCode {
    StatusCode::OK
}

pub async fn control(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<crate::models::ControlRequest>,
) -> Response {
    match service::handle_control(&state, req, &addr.ip().to_string()).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn raw(State(state): State<AppState>, Json(req): Json<RawRequest>) -> Response {
    match ingest::handle_raw(&state, req).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn status(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(service::status(&state).await)).into_response()
}

pub async fn list_devices(State(state): State<AppState>) -> Response {
    let devices = state.devices.all().await;
    (StatusCode::OK, Json(DeviceList { devices })).into_response()
}

pub async fn assign_device(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(req): Json<AssignDeviceRequest>,
) -> Response {
    match service::assign_device(&state, &uuid, req.instance_name.as_deref()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn list_instances(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(service::list_instances(&state).await)).into_response()
}

pub async fn create_instance(
    State(state): State<AppState>,
    Json(instance): Json<Instance>,
) -> Response {
    match service::create_instance(&state, instance).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn update_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(instance): Json<Instance>,
) -> Response {
    match service::update_instance(&state, &name, instance).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match service::delete_instance(&state, &name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn list_assignments(State(state): State<AppState>) -> Response {
    let assignments = state.scheduler.list().await;
    (StatusCode::OK, Json(AssignmentList { assignments })).into_response()
}

pub async fn create_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    match service::add_assignment(&state, req).await {
        Ok(assignment) => (StatusCode::CREATED, Json(assignment)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    match service::delete_assignment(&state, req).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_all_assignments(State(state): State<AppState>) -> Response {
    state.scheduler.delete_all().await;
    StatusCode::NO_CONTENT.into_response()
}

pub async fn start_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    match service::start_assignment(&state, req).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn add_accounts(
    State(state): State<AppState>,
    Json(req): Json<AddAccountsRequest>,
) -> Response {
    match service::add_accounts(&state, req).await {
        Ok(resp) => (StatusCode::CREATED, Json(resp)).into_response(),
        Err(err) => error_response(err),
    }
}
