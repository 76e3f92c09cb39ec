//! Event types for parkwatchd -> client streaming

use chrono::{DateTime, Local};
use parkwatch_util::EmployeeId;
use serde::{Deserialize, Serialize};

use crate::{AlertEvent, NotificationJob, SanctionOutcome, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: parkwatch_util::now(),
            payload,
        }
    }
}

/// All possible events from the daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A new attendance alert was recorded
    AlertRaised(AlertEvent),

    /// A complaint changed an employee's sanction state
    SanctionChanged {
        employee_id: EmployeeId,
        outcome: SanctionOutcome,
    },

    /// A ban ran out and the employee's vehicles were reauthorized
    BanExpired { employee_id: EmployeeId },

    /// A notification exhausted its attempts
    NotificationFailed(NotificationJob),
}
