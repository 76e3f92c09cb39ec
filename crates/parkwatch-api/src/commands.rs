//! Command types for the parkwatch protocol

use chrono::{DateTime, Local};
use parkwatch_util::{ClientId, EmployeeId, VehicleId};
use serde::{Deserialize, Serialize};

use crate::{
    AlertEvent, ClientRole, Complaint, HealthStatus, JobStatus, NotificationJob, PresenceSample,
    SanctionOutcome, SanctionRecord, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    UnknownEmployee,
    PermissionDenied,
    /// The requested state change may only be made by the sanction ledger
    InvalidTransition,
    NotFound,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Evaluate attendance now; returns newly created alerts
    CheckAlertsNow,

    /// Lift every ban whose end has passed
    ExpireBansNow,

    /// Record an accepted complaint and escalate
    FileComplaint { complaint: Complaint },

    /// Presence feed reading
    ReportPresence { sample: PresenceSample },

    /// List recorded alerts, newest first
    ListAlerts {
        employee_id: Option<EmployeeId>,
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// Sanction record of one employee
    GetSanction { employee_id: EmployeeId },

    /// List notification jobs, newest first
    ListNotifications {
        status: Option<JobStatus>,
        #[serde(default = "default_limit")]
        limit: usize,
    },

    /// Requeue a failed notification job for one more delivery attempt
    RetryNotification { job_id: i64 },

    /// Direct authorization toggle. Authorization is derived from sanctions,
    /// so this is always refused; it exists so the refusal is explicit.
    SetVehicleAuthorization { vehicle_id: VehicleId, authorized: bool },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

fn default_limit() -> usize {
    100
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Alerts created by this check (empty when nothing was violated)
    AlertsChecked {
        checked_at: DateTime<Local>,
        created: Vec<AlertEvent>,
    },
    BansExpired {
        employees: Vec<EmployeeId>,
    },
    ComplaintRecorded(SanctionOutcome),
    PresenceRecorded {
        /// False when the vehicle is currently banned; the barrier should
        /// refuse entry.
        authorized: bool,
    },
    Alerts(Vec<AlertEvent>),
    Sanction(SanctionRecord),
    Notifications(Vec<NotificationJob>),
    NotificationRequeued {
        job_id: i64,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Command::CheckAlertsNow);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"check_alerts_now\""));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::CheckAlertsNow));
    }

    #[test]
    fn list_alerts_limit_defaults() {
        let json = r#"{"type":"list_alerts","employee_id":null}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(command, Command::ListAlerts { limit: 100, .. }));
    }

    #[test]
    fn error_response_serialization() {
        let resp = Response::error(
            7,
            ErrorInfo::new(ErrorCode::InvalidTransition, "authorization follows sanctions"),
        );
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 7);
        assert!(matches!(
            parsed.result,
            ResponseResult::Err(ErrorInfo { code: ErrorCode::InvalidTransition, .. })
        ));
    }
}
