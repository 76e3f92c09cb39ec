//! Shared value types

use chrono::{DateTime, Local, NaiveDate};
use parkwatch_util::{ComplaintId, EmployeeId, SpotId, VehicleId};
use serde::{Deserialize, Serialize};

/// Vehicle category. State-owned vehicles must be on site overnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    #[default]
    Ordinary,
    State,
}

/// Kinds of attendance alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Not at the assigned spot by schedule start + grace
    LateAbsent,
    /// State vehicle absent during the night window
    NightAbsentState,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LateAbsent => "late_absent",
            AlertKind::NightAbsentState => "night_absent_state",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "late_absent" => Some(AlertKind::LateAbsent),
            "night_absent_state" => Some(AlertKind::NightAbsentState),
            _ => None,
        }
    }

    /// Message kind sent for this alert
    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            AlertKind::LateAbsent => NotificationKind::LateAbsentAlert,
            AlertKind::NightAbsentState => NotificationKind::NightAbsentAlert,
        }
    }
}

/// A recorded attendance alert. At most one exists per
/// (employee, kind, window_date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: i64,
    pub employee_id: EmployeeId,
    pub kind: AlertKind,
    pub window_date: NaiveDate,
    pub created_at: DateTime<Local>,
    /// Vehicles that were expected at the spot
    pub vehicles: Vec<VehicleId>,
    pub message: String,
}

/// Alert about to be recorded (id and creation time assigned by the store)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub employee_id: EmployeeId,
    pub kind: AlertKind,
    pub window_date: NaiveDate,
    pub vehicles: Vec<VehicleId>,
    pub message: String,
}

/// A complaint about an employee occupying someone else's spot. Created by
/// the intake system, never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub complaint_id: ComplaintId,
    /// The employee the complaint is against
    pub employee_id: EmployeeId,
    pub submitted_at: DateTime<Local>,
    /// Opaque reference to uploaded evidence (photo path, document id)
    #[serde(default)]
    pub evidence_ref: Option<String>,
    #[serde(default)]
    pub complainant_id: Option<EmployeeId>,
    /// Spot that was occupied
    #[serde(default)]
    pub spot_id: Option<SpotId>,
}

/// A time-boxed parking ban
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl Ban {
    /// Expired once `end` has been reached
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        self.end <= now
    }
}

/// Escalation state derived from a sanction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionState {
    Clean,
    Warned,
    Banned,
}

/// Per-employee complaint tally and ban state. `complaint_count` never
/// decreases; a ban ending does not reset it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionRecord {
    pub employee_id: EmployeeId,
    pub complaint_count: u32,
    pub active_ban: Option<Ban>,
    pub updated_at: Option<DateTime<Local>>,
}

impl SanctionRecord {
    pub fn clean(employee_id: EmployeeId) -> Self {
        Self {
            employee_id,
            complaint_count: 0,
            active_ban: None,
            updated_at: None,
        }
    }

    pub fn state(&self) -> SanctionState {
        if self.active_ban.is_some() {
            SanctionState::Banned
        } else if self.complaint_count == 0 {
            SanctionState::Clean
        } else {
            SanctionState::Warned
        }
    }

    /// Whether the employee's vehicles must be refused at `now`
    pub fn is_banned_at(&self, now: DateTime<Local>) -> bool {
        self.active_ban.is_some_and(|ban| !ban.is_expired(now))
    }
}

/// Result of recording a complaint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SanctionOutcome {
    /// First complaint: warning sent, no ban
    Warned { record: SanctionRecord },
    /// A new ban was imposed
    Banned { record: SanctionRecord, ban: Ban },
    /// Count incremented while a ban was already running; no new ban
    AlreadyBanned { record: SanctionRecord },
    /// The complaint id was already processed
    Duplicate { complaint_id: ComplaintId },
}

impl SanctionOutcome {
    pub fn record(&self) -> Option<&SanctionRecord> {
        match self {
            SanctionOutcome::Warned { record }
            | SanctionOutcome::Banned { record, .. }
            | SanctionOutcome::AlreadyBanned { record } => Some(record),
            SanctionOutcome::Duplicate { .. } => None,
        }
    }
}

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "sms" => Some(NotificationChannel::Sms),
            _ => None,
        }
    }
}

/// Fixed message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LateAbsentAlert,
    NightAbsentAlert,
    Warning,
    Ban,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::LateAbsentAlert => "late_absent_alert",
            NotificationKind::NightAbsentAlert => "night_absent_alert",
            NotificationKind::Warning => "warning",
            NotificationKind::Ban => "ban",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "late_absent_alert" => Some(NotificationKind::LateAbsentAlert),
            "night_absent_alert" => Some(NotificationKind::NightAbsentAlert),
            "warning" => Some(NotificationKind::Warning),
            "ban" => Some(NotificationKind::Ban),
            _ => None,
        }
    }
}

/// Delivery status of a notification job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "sent" => Some(JobStatus::Sent),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub subject: String,
    pub body: String,
}

/// A queued or completed delivery on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: i64,
    pub employee_id: EmployeeId,
    /// Email address or phone number, depending on channel
    pub recipient: String,
    pub channel: NotificationChannel,
    pub kind: NotificationKind,
    pub payload: NotificationPayload,
    pub attempt_count: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Local>,
    /// Earliest time the next attempt may run (backoff)
    pub next_attempt_at: Option<DateTime<Local>>,
}

/// Notification about to be queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub employee_id: EmployeeId,
    pub recipient: String,
    pub channel: NotificationChannel,
    pub kind: NotificationKind,
    pub payload: NotificationPayload,
}

/// One reading from the presence feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSample {
    pub vehicle_id: VehicleId,
    pub spot_id: SpotId,
    pub observed_at: DateTime<Local>,
    pub present: bool,
}

/// Client roles, resolved by the IPC layer from peer credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Local administrator - every command
    Admin,
    /// Human resources - review alerts, sanctions and deliveries
    Hr,
    /// Complaint intake / presence feed service
    Intake,
    /// Employee self-service - may file complaints
    Employee,
    /// Anything else - health and ping only
    Guest,
}

impl ClientRole {
    pub fn can_trigger_checks(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }

    pub fn can_file_complaints(&self) -> bool {
        matches!(
            self,
            ClientRole::Admin | ClientRole::Hr | ClientRole::Intake | ClientRole::Employee
        )
    }

    pub fn can_report_presence(&self) -> bool {
        matches!(self, ClientRole::Admin | ClientRole::Intake)
    }

    pub fn can_review(&self) -> bool {
        matches!(self, ClientRole::Admin | ClientRole::Hr)
    }

    pub fn can_manage_notifications(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub store_ok: bool,
    pub employee_count: usize,
    pub pending_notifications: usize,
    pub failed_notifications: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanction_state_follows_count_and_ban() {
        let mut record = SanctionRecord::clean(EmployeeId::new("e-1"));
        assert_eq!(record.state(), SanctionState::Clean);

        record.complaint_count = 1;
        assert_eq!(record.state(), SanctionState::Warned);

        let start = Local.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let end = start + chrono::Duration::days(3);
        record.complaint_count = 2;
        record.active_ban = Some(Ban { start, end });
        assert_eq!(record.state(), SanctionState::Banned);
        assert!(record.is_banned_at(start));
        assert!(!record.is_banned_at(end));
    }

    #[test]
    fn enum_storage_names_round_trip() {
        for kind in [AlertKind::LateAbsent, AlertKind::NightAbsentState] {
            assert_eq!(AlertKind::parse(kind.as_str()), Some(kind));
        }
        for status in [JobStatus::Pending, JobStatus::Sent, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NotificationChannel::parse("fax"), None);
    }

    #[test]
    fn role_capabilities() {
        assert!(ClientRole::Admin.can_trigger_checks());
        assert!(!ClientRole::Hr.can_trigger_checks());
        assert!(ClientRole::Hr.can_review());
        assert!(ClientRole::Employee.can_file_complaints());
        assert!(!ClientRole::Employee.can_review());
        assert!(!ClientRole::Guest.can_file_complaints());
        assert!(ClientRole::Intake.can_report_presence());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = SanctionOutcome::Duplicate {
            complaint_id: ComplaintId::new("c-9"),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"duplicate\""));
    }
}
