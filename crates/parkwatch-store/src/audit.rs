//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use parkwatch_api::{AlertKind, NotificationChannel, SanctionState};
use parkwatch_util::{ComplaintId, EmployeeId, VehicleId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Daemon started
    DaemonStarted,

    /// Daemon stopped
    DaemonStopped,

    /// Configuration loaded
    ConfigLoaded { employee_count: usize },

    /// Attendance alert recorded
    AlertRaised {
        alert_id: i64,
        employee_id: EmployeeId,
        kind: AlertKind,
        window_date: NaiveDate,
    },

    /// Complaint applied to a sanction record
    SanctionChanged {
        employee_id: EmployeeId,
        complaint_id: ComplaintId,
        complaint_count: u32,
        state: SanctionState,
    },

    /// Ban reached its end and was cleared
    BanExpired { employee_id: EmployeeId },

    /// Gate changed a vehicle's flag
    AuthorizationChanged {
        vehicle_id: VehicleId,
        authorized: bool,
    },

    /// A client tried to toggle authorization directly
    AuthorizationToggleRejected {
        vehicle_id: VehicleId,
        requested: bool,
        client_id: String,
    },

    /// Notification gave up after its last attempt
    NotificationFailed {
        job_id: i64,
        channel: NotificationChannel,
        error: String,
    },

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: parkwatch_util::now(),
            event,
        }
    }
}
