//! Raw configuration schema (as parsed from TOML)

use parkwatch_api::VehicleClass;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Daemon settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Alert and sanction parameters
    #[serde(default)]
    pub policy: RawPolicy,

    /// Notification transports
    #[serde(default)]
    pub notifications: RawNotifications,

    /// Employee roster
    #[serde(default)]
    pub employees: Vec<RawEmployee>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Seconds between periodic evaluation cycles (default: 60)
    pub evaluation_interval_seconds: Option<u64>,

    /// Unix uids granted non-guest roles
    #[serde(default)]
    pub roles: RawRoles,
}

/// uid lists per role. root and the daemon's own uid are always admin.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRoles {
    #[serde(default)]
    pub hr: Vec<u32>,
    #[serde(default)]
    pub intake: Vec<u32>,
    #[serde(default)]
    pub employee: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPolicy {
    /// Minutes after schedule start before absence counts (default: 1)
    pub grace_minutes: Option<u32>,

    /// Ban length in days (default: 3)
    pub ban_days: Option<u32>,

    /// Presence samples older than this are stale for the late rule (default: 30)
    pub presence_max_age_minutes: Option<u32>,

    /// Presence samples older than this are stale for the night rule (default: 120)
    pub night_presence_max_age_minutes: Option<u32>,

    /// State-vehicle night window (default: 20:00 - 08:00)
    pub night_window: Option<RawClockRange>,
}

/// Start/end wall-clock pair, HH:MM
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawClockRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNotifications {
    /// Facility name used in message subjects
    pub facility_name: Option<String>,

    /// Delivery attempts per job before it stays FAILED (default: 3)
    pub max_attempts: Option<u32>,

    /// Backoff before the second attempt, doubled for each further one (default: 30)
    pub backoff_seconds: Option<u64>,

    /// SMTP relay; absent disables email
    pub email: Option<RawEmailTransport>,

    /// SMS HTTP API; absent disables SMS
    pub sms: Option<RawSmsTransport>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEmailTransport {
    pub server: String,
    /// Default: 587
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSmsTransport {
    pub endpoint: String,
    pub api_key: String,
    pub sender: Option<String>,
}

/// Raw roster entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawEmployee {
    /// Unique stable ID
    pub id: String,

    /// Display name
    pub name: String,

    pub email: Option<String>,

    pub phone: Option<String>,

    /// Assigned parking spot
    pub spot: String,

    #[serde(default)]
    pub vehicle_class: VehicleClass,

    #[serde(default)]
    pub vehicles: Vec<RawVehicle>,

    /// Expected presence window
    pub schedule: RawTimeWindow,

    /// Approved absences
    #[serde(default)]
    pub leave: Vec<RawLeave>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawVehicle {
    pub id: String,
    pub plate: Option<String>,
}

/// Time window
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTimeWindow {
    /// Days of week: "weekdays", "weekends", "all", or list like ["mon", "tue", "wed"]
    pub days: RawDays,

    /// Start time (HH:MM format)
    pub start: String,

    /// End time (HH:MM format)
    pub end: String,
}

/// Days a schedule applies to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawDays {
    Preset(String),
    List(Vec<String>),
}

/// Approved absence, inclusive date range (YYYY-MM-DD)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLeave {
    pub start: String,
    pub end: String,
    pub reason: Option<String>,
}
