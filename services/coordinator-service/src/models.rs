use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::account::Account;
use crate::device::Device;
use crate::instance::Instance;
use crate::scheduler::Assignment;

/// Body of the device control channel. Every message carries a `type`; the
/// rest of the fields depend on it and are optional here.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "ptcToken")]
    pub ptc_token: Option<String>,
    pub min_level: Option<u8>,
    pub max_level: Option<u8>,
}

/// One upload frame. Plain clients send `method` + base64 `data`; the
/// MAD-style shape instead nests the payload under `type`/`payload`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    pub method: Option<u32>,
    pub data: Option<String>,
    #[serde(rename = "type")]
    pub type_id: Option<u32>,
    pub payload: Option<String>,
}

/// Body of a raw data upload. Clients disagree on the container key
/// (`contents`, `protos` or `gmo`) and on the trainer level key, so all
/// spellings are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRequest {
    pub uuid: Option<String>,
    pub username: Option<String>,
    #[serde(default, rename = "trainerlvl", alias = "trainerLevel")]
    pub trainer_level: Option<Value>,
    pub lat_target: Option<f64>,
    pub lon_target: Option<f64>,
    pub target_max_distance: Option<f64>,
    pub pokemon_encounter_id: Option<String>,
    pub pokemon_encounter_id_for_encounter: Option<String>,
    #[serde(default)]
    pub list_scatter_pokemon: bool,
    pub contents: Option<Vec<RawFrame>>,
    pub protos: Option<Vec<RawFrame>>,
    pub gmo: Option<Vec<RawFrame>>,
    /// Top-level MAD frame, only used when no container key is present.
    #[serde(rename = "type")]
    pub type_id: Option<u32>,
    pub payload: Option<String>,
}

impl RawRequest {
    /// Trainer level arrives as a number or a numeric string depending on
    /// the client.
    pub fn trainer_level(&self) -> Option<u8> {
        match self.trainer_level.as_ref()? {
            Value::Number(n) => n.as_u64().map(|v| v.min(u8::MAX as u64) as u8),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScatterPokemon {
    pub lat: f64,
    pub lon: f64,
    pub id: u16,
}

/// Ingestion summary returned to the uploading device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawSummary {
    pub nearby: usize,
    pub wild: usize,
    pub forts: usize,
    pub quests: usize,
    pub encounters: usize,
    pub level: Option<u8>,
    pub only_empty_gmos: bool,
    pub only_invalid_gmos: bool,
    pub contains_gmos: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_area: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat_target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon_target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pokemon_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pokemon_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pokemon_encounter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scatter_pokemon: Option<Vec<ScatterPokemon>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentRequest {
    pub instance_name: String,
    pub device_uuid: String,
    #[serde(default)]
    pub time: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignDeviceRequest {
    pub instance_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddAccountsRequest {
    /// One `username,password[,level]` entry per line. Semicolons and colons
    /// are accepted as separators too.
    pub accounts: String,
    #[serde(default)]
    pub level: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddAccountsResponse {
    pub parsed: usize,
    pub added: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    #[serde(flatten)]
    pub instance: Instance,
    pub status: String,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub instances: usize,
    pub devices: usize,
    pub assignments: usize,
    pub pokemon: usize,
    pub forts: usize,
    pub quests: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceList {
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentList {
    pub assignments: Vec<Assignment>,
}

/// Envelope for control channel replies; device clients expect their fields
/// under `data`.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            data: Value::Null,
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            status: "ok",
            data,
        }
    }
}

/// The account fields a device is allowed to see.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub username: String,
    pub password: String,
    pub level: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_warning_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptc_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_encounter_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_encounter_lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_encounter_time: Option<u64>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            username: account.username,
            password: account.password,
            level: account.level,
            first_warning_timestamp: account.first_warning_timestamp,
            ptc_token: account.ptc_token,
            last_encounter_lat: account.last_encounter_lat,
            last_encounter_lon: account.last_encounter_lon,
            last_encounter_time: account.last_encounter_time,
        }
    }
}
