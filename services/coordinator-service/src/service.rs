use axum::http::StatusCode;
use serde_json::json;
use tracing::{error, info, warn};

use crate::account::Account;
use crate::instance::Instance;
use crate::models::{
    AddAccountsRequest, AddAccountsResponse, AccountView, AssignmentRequest, ControlRequest,
    ControlResponse, ErrorResponse, InstanceStatus, StatusResponse,
};
use crate::scheduler::Assignment;
use crate::state::AppState;

/// Error surfaced to HTTP callers: a status code plus a machine-readable
/// body the handlers serialize as-is.
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code,
                message: message.into(),
            },
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

fn require<'a>(field: &'a Option<String>, name: &'static str) -> Result<&'a str, ServiceError> {
    field
        .as_deref()
        .ok_or_else(|| ServiceError::bad_request("missing_field", format!("{name} is required")))
}

/// Account-state reports are keyed by the device's currently bound account;
/// an explicit username in the request overrides the binding.
async fn resolve_username(
    state: &AppState,
    req: &ControlRequest,
) -> Result<String, ServiceError> {
    if let Some(username) = req.username.as_deref() {
        return Ok(username.to_string());
    }
    let uuid = require(&req.uuid, "uuid")?;
    let Some(device) = state.devices.get(uuid).await else {
        return Err(ServiceError::not_found("unknown_device", uuid));
    };
    device.account_username.ok_or_else(|| {
        ServiceError::not_found(
            "no_account",
            format!("device {uuid} has no bound account"),
        )
    })
}

/// Dispatch one control-channel message by its `type`.
pub async fn handle_control(
    state: &AppState,
    req: ControlRequest,
    host: &str,
) -> Result<ControlResponse, ServiceError> {
    match req.kind.as_str() {
        "init" => {
            let uuid = require(&req.uuid, "uuid")?;
            let device = state.devices.register(uuid).await;
            state.devices.touch(uuid, host, false).await;
            let first_warning = match device.account_username.as_deref() {
                Some(username) => state
                    .accounts
                    .get(username)
                    .await
                    .and_then(|a| a.first_warning_timestamp),
                None => None,
            };
            info!(uuid, host, "device init");
            Ok(ControlResponse::with_data(json!({
                "assigned": device.instance_name.is_some(),
                "first_warning_timestamp": first_warning,
            })))
        }
        "heartbeat" => {
            let uuid = require(&req.uuid, "uuid")?;
            state.devices.touch(uuid, host, false).await;
            Ok(ControlResponse::ok())
        }
        "last_seen" => {
            let uuid = require(&req.uuid, "uuid")?;
            state.devices.touch(uuid, host, true).await;
            Ok(ControlResponse::ok())
        }
        "get_job" => get_task(state, &req, false).await,
        "get_startup" => get_task(state, &req, true).await,
        "get_account" => get_account(state, &req).await,
        "tutorial_done" => {
            let username = resolve_username(state, &req).await?;
            if state.accounts.mark_tutorial_done(&username).await {
                Ok(ControlResponse::ok())
            } else {
                Err(ServiceError::not_found("unknown_account", username))
            }
        }
        "account_banned" => flag_account(state, &req, "banned").await,
        "account_invalid_credentials" => flag_account(state, &req, "invalid_credentials").await,
        "error_26" => flag_account(state, &req, "error_26").await,
        "account_warning" => {
            let username = resolve_username(state, &req).await?;
            warn!(username, "account warning reported");
            if state.accounts.mark_warning(&username).await {
                Ok(ControlResponse::ok())
            } else {
                Err(ServiceError::not_found("unknown_account", username))
            }
        }
        "logged_out" => logged_out(state, &req).await,
        "ptcToken" => {
            let username = resolve_username(state, &req).await?;
            let token = require(&req.ptc_token, "ptcToken")?;
            if state.accounts.set_ptc_token(&username, token).await {
                Ok(ControlResponse::ok())
            } else {
                Err(ServiceError::not_found("unknown_account", username))
            }
        }
        "job_failed" => {
            warn!(
                uuid = req.uuid.as_deref().unwrap_or("unknown"),
                username = req.username.as_deref().unwrap_or("unknown"),
                "device reported a failed task"
            );
            Ok(ControlResponse::ok())
        }
        other => Err(ServiceError::not_found(
            "unknown_type",
            format!("unknown control type {other}"),
        )),
    }
}

async fn get_task(
    state: &AppState,
    req: &ControlRequest,
    startup: bool,
) -> Result<ControlResponse, ServiceError> {
    let uuid = require(&req.uuid, "uuid")?;
    let Some(controller) = state.coordinator.controller_for_device(uuid).await else {
        return Err(ServiceError::not_found(
            "no_instance",
            format!("device {uuid} has no instance"),
        ));
    };
    match controller.get_task(uuid, req.username.as_deref(), startup) {
        Some(task) => Ok(ControlResponse::with_data(
            serde_json::to_value(task).unwrap_or_default(),
        )),
        None => Err(ServiceError::not_found(
            "no_task",
            format!("no task available for {uuid}"),
        )),
    }
}

async fn get_account(
    state: &AppState,
    req: &ControlRequest,
) -> Result<ControlResponse, ServiceError> {
    let uuid = require(&req.uuid, "uuid")?;
    let min_level = req.min_level.unwrap_or(0);
    let max_level = req.max_level.unwrap_or(29);
    let device = state.devices.register(uuid).await;

    // Hand the same account back while it is still usable for the asked
    // level range.
    if let Some(current) = device.account_username.as_deref() {
        if let Some(account) = state.accounts.get(current).await {
            if account.device_uuid.as_deref() == Some(uuid)
                && account.eligible(min_level, max_level)
            {
                return Ok(ControlResponse::with_data(
                    serde_json::to_value(AccountView::from(account)).unwrap_or_default(),
                ));
            }
        }
    }

    let Some(account) = state.accounts.acquire(min_level, max_level, uuid).await else {
        return Err(ServiceError::not_found(
            "no_account",
            format!("no account available for levels {min_level}-{max_level}"),
        ));
    };
    state
        .devices
        .set_account(uuid, Some(&account.username))
        .await;
    info!(uuid, username = %account.username, "account assigned");
    Ok(ControlResponse::with_data(
        serde_json::to_value(AccountView::from(account)).unwrap_or_default(),
    ))
}

async fn flag_account(
    state: &AppState,
    req: &ControlRequest,
    reason: &str,
) -> Result<ControlResponse, ServiceError> {
    let username = resolve_username(state, req).await?;
    warn!(username, reason, "account flagged by device");
    if state.accounts.mark_failed(&username, reason).await {
        Ok(ControlResponse::ok())
    } else {
        Err(ServiceError::not_found("unknown_account", username))
    }
}

async fn logged_out(
    state: &AppState,
    req: &ControlRequest,
) -> Result<ControlResponse, ServiceError> {
    let uuid = require(&req.uuid, "uuid")?;
    let Some(device) = state.devices.get(uuid).await else {
        return Err(ServiceError::not_found("unknown_device", uuid));
    };
    if let Some(username) = device.account_username.as_deref() {
        if device.last_lat != 0.0 || device.last_lon != 0.0 {
            state
                .accounts
                .set_cooldown(username, device.last_lat, device.last_lon)
                .await;
        }
        // A failed account will not come back to this instance; do not
        // record it as the last worker.
        let last_instance = if state.accounts.has_failed(username).await {
            None
        } else {
            device.instance_name.as_deref()
        };
        state.accounts.release(username, last_instance).await;
        state.devices.set_account(uuid, None).await;
        info!(uuid, username, "account released on logout");
    }
    Ok(ControlResponse::ok())
}

pub async fn create_instance(state: &AppState, instance: Instance) -> Result<(), ServiceError> {
    if state.coordinator.contains(&instance.name).await {
        return Err(ServiceError::new(
            StatusCode::CONFLICT,
            "duplicate_instance",
            format!("instance {} already exists", instance.name),
        ));
    }
    state
        .coordinator
        .add_instance(instance)
        .await
        .map_err(|err| ServiceError::bad_request("invalid_instance", err.to_string()))?;
    persist_instances(state).await;
    Ok(())
}

pub async fn update_instance(
    state: &AppState,
    name: &str,
    mut instance: Instance,
) -> Result<(), ServiceError> {
    instance.name = name.to_string();
    let replaced = state
        .coordinator
        .reload_instance(instance)
        .await
        .map_err(|err| ServiceError::bad_request("invalid_instance", err.to_string()))?;
    if !replaced {
        return Err(ServiceError::not_found("unknown_instance", name));
    }
    persist_instances(state).await;
    Ok(())
}

pub async fn delete_instance(state: &AppState, name: &str) -> Result<(), ServiceError> {
    if !state.coordinator.remove_instance(name).await {
        return Err(ServiceError::not_found("unknown_instance", name));
    }
    state.devices.clear_instance(name).await;
    state.scheduler.clear_instance(name).await;
    persist_instances(state).await;
    Ok(())
}

pub async fn list_instances(state: &AppState) -> Vec<InstanceStatus> {
    let devices = state.devices.all().await;
    let mut out = Vec::new();
    for instance in state.coordinator.instances().await {
        let status = state
            .coordinator
            .instance_status(&instance.name)
            .await
            .unwrap_or_default();
        let bound = devices
            .iter()
            .filter(|d| d.instance_name.as_deref() == Some(instance.name.as_str()))
            .map(|d| d.uuid.clone())
            .collect();
        out.push(InstanceStatus {
            instance,
            status,
            devices: bound,
        });
    }
    out
}

pub async fn add_assignment(
    state: &AppState,
    req: AssignmentRequest,
) -> Result<Assignment, ServiceError> {
    if !state.coordinator.contains(&req.instance_name).await {
        return Err(ServiceError::not_found(
            "unknown_instance",
            req.instance_name,
        ));
    }
    Ok(state
        .scheduler
        .add(req.instance_name, req.device_uuid, req.time, req.enabled)
        .await)
}

pub async fn delete_assignment(
    state: &AppState,
    req: AssignmentRequest,
) -> Result<(), ServiceError> {
    if state
        .scheduler
        .delete(&req.instance_name, &req.device_uuid, req.time)
        .await
    {
        Ok(())
    } else {
        Err(ServiceError::not_found(
            "unknown_assignment",
            format!("{}/{}", req.instance_name, req.device_uuid),
        ))
    }
}

pub async fn start_assignment(
    state: &AppState,
    req: AssignmentRequest,
) -> Result<(), ServiceError> {
    if state
        .scheduler
        .start(&req.instance_name, &req.device_uuid, req.time)
        .await
    {
        Ok(())
    } else {
        Err(ServiceError::not_found(
            "unknown_assignment",
            format!("{}/{}", req.instance_name, req.device_uuid),
        ))
    }
}

pub async fn assign_device(
    state: &AppState,
    uuid: &str,
    instance_name: Option<&str>,
) -> Result<(), ServiceError> {
    if let Some(name) = instance_name {
        if !state.coordinator.contains(name).await {
            return Err(ServiceError::not_found("unknown_instance", name));
        }
    }
    state.devices.assign(uuid, instance_name).await;
    state.coordinator.reload_device(uuid, instance_name).await;
    info!(
        uuid,
        instance = instance_name.unwrap_or("none"),
        "device assigned"
    );
    Ok(())
}

/// Parse `username,password[,level]` lines; `;` and `:` also separate
/// fields. Malformed lines are skipped.
pub async fn add_accounts(
    state: &AppState,
    req: AddAccountsRequest,
) -> Result<AddAccountsResponse, ServiceError> {
    let mut parsed = Vec::new();
    for line in req.accounts.lines() {
        let line = line.trim().replace([';', ':'], ",");
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(username), Some(password)) = (fields.next(), fields.next()) else {
            continue;
        };
        if username.is_empty() || password.is_empty() {
            continue;
        }
        let level = fields
            .next()
            .and_then(|f| f.parse().ok())
            .unwrap_or(req.level);
        parsed.push(Account::new(
            username.to_string(),
            password.to_string(),
            level,
        ));
    }
    if parsed.is_empty() {
        return Err(ServiceError::bad_request(
            "no_accounts",
            "no parsable account lines",
        ));
    }
    let count = parsed.len();
    let added = state.accounts.add_many(parsed).await;
    Ok(AddAccountsResponse {
        parsed: count,
        added,
    })
}

pub async fn status(state: &AppState) -> StatusResponse {
    let (pokemon, forts, quests) = state.world.counts().await;
    StatusResponse {
        instances: state.coordinator.instances().await.len(),
        devices: state.devices.all().await.len(),
        assignments: state.scheduler.list().await.len(),
        pokemon,
        forts,
        quests,
    }
}

async fn persist_instances(state: &AppState) {
    let instances = state.coordinator.instances().await;
    if let Err(err) = state.store.save_with_retry("instances", &instances).await {
        error!(error = %err, "instance snapshot persist failed");
    }
}
