//! Repository traits, one per persisted entity

use chrono::{DateTime, Local, NaiveDate};
use parkwatch_api::{
    AlertEvent, AlertKind, Complaint, JobStatus, NewAlert, NewNotification, NotificationJob,
    PresenceSample, SanctionRecord,
};
use parkwatch_util::{EmployeeId, SpotId, VehicleId};
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// Append-only alert log
pub trait AlertLog {
    /// Insert the alert unless one already exists for its
    /// (employee, kind, window_date), queueing `notifications` in the same
    /// transaction. Returns `None` when the alert was already recorded, in
    /// which case nothing is written.
    fn record_alert(
        &self,
        alert: &NewAlert,
        at: DateTime<Local>,
        notifications: &[NewNotification],
    ) -> StoreResult<Option<AlertEvent>>;

    fn alert_exists(
        &self,
        employee_id: &EmployeeId,
        kind: AlertKind,
        window_date: NaiveDate,
    ) -> StoreResult<bool>;

    /// Most recent alerts first
    fn list_alerts(
        &self,
        employee_id: Option<&EmployeeId>,
        limit: usize,
    ) -> StoreResult<Vec<AlertEvent>>;
}

/// New sanction state produced by the escalation function, plus the
/// notifications that announce it
#[derive(Debug, Clone)]
pub struct SanctionTransition {
    pub record: SanctionRecord,
    pub notifications: Vec<NewNotification>,
}

/// Result of [`SanctionStore::apply_complaint`]
#[derive(Debug, Clone)]
pub enum ComplaintApplied {
    Applied {
        previous: SanctionRecord,
        record: SanctionRecord,
        jobs: Vec<NotificationJob>,
    },
    /// The complaint id was recorded earlier; nothing written
    Duplicate,
}

/// Sanction records, one per employee
pub trait SanctionStore {
    /// Current record, or a clean one if the employee has none yet
    fn get_sanction(&self, employee_id: &EmployeeId) -> StoreResult<SanctionRecord>;

    /// Every record with a ban set, expired or not
    fn list_banned(&self) -> StoreResult<Vec<SanctionRecord>>;

    /// Apply one complaint as a single exclusive transaction: check the
    /// complaint id, read the employee's record, run `decide` on it, write the
    /// result, the complaint and the notification jobs, commit.
    fn apply_complaint(
        &self,
        complaint: &Complaint,
        at: DateTime<Local>,
        decide: &dyn Fn(&SanctionRecord) -> SanctionTransition,
    ) -> StoreResult<ComplaintApplied>;

    /// Clear the employee's ban if it has ended by `now`. Returns the updated
    /// record, or `None` if there was nothing to clear.
    fn clear_expired_ban(
        &self,
        employee_id: &EmployeeId,
        now: DateTime<Local>,
    ) -> StoreResult<Option<SanctionRecord>>;
}

/// Notification jobs (transactional outbox)
pub trait NotificationOutbox {
    /// Jobs ready to attempt: PENDING ones, and FAILED ones with fewer than
    /// `max_attempts` attempts whose backoff has elapsed. Oldest first.
    fn due_notifications(
        &self,
        now: DateTime<Local>,
        max_attempts: u32,
        limit: usize,
    ) -> StoreResult<Vec<NotificationJob>>;

    fn get_notification(&self, id: i64) -> StoreResult<Option<NotificationJob>>;

    /// Newest first
    fn list_notifications(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> StoreResult<Vec<NotificationJob>>;

    fn count_notifications(&self, status: JobStatus) -> StoreResult<usize>;

    /// Record a successful attempt
    fn mark_sent(&self, id: i64, at: DateTime<Local>) -> StoreResult<NotificationJob>;

    /// Record a failed attempt. `retry_at` is when the next attempt may run,
    /// `None` when no further attempt is planned.
    fn mark_failed(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Local>>,
    ) -> StoreResult<NotificationJob>;

    /// Put a FAILED job back to PENDING for one more attempt. Returns false if
    /// the job is not FAILED.
    fn requeue_notification(&self, id: i64) -> StoreResult<bool>;
}

/// Persisted authorization flag of one vehicle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleAuthorization {
    pub vehicle_id: VehicleId,
    pub employee_id: EmployeeId,
    pub authorized: bool,
    pub updated_at: DateTime<Local>,
}

/// Vehicle authorization flags. Vehicles without a row are authorized.
pub trait AuthorizationStore {
    /// Returns true if the stored flag changed
    fn set_vehicle_authorized(
        &self,
        vehicle_id: &VehicleId,
        employee_id: &EmployeeId,
        authorized: bool,
        at: DateTime<Local>,
    ) -> StoreResult<bool>;

    fn is_vehicle_authorized(&self, vehicle_id: &VehicleId) -> StoreResult<bool>;

    fn list_vehicle_authorizations(&self) -> StoreResult<Vec<VehicleAuthorization>>;
}

/// Presence readings reported by the feed
pub trait PresenceLog {
    fn record_presence(&self, sample: &PresenceSample) -> StoreResult<()>;

    /// Latest sample for the vehicle at the spot observed at or before `at`
    fn latest_presence(
        &self,
        vehicle_id: &VehicleId,
        spot_id: &SpotId,
        at: DateTime<Local>,
    ) -> StoreResult<Option<PresenceSample>>;

    /// Delete samples observed before `before`; returns how many were removed
    fn prune_presence(&self, before: DateTime<Local>) -> StoreResult<usize>;
}

/// Append-only audit log
pub trait AuditLog {
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Most recent first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;
}

/// Main store trait
pub trait Store:
    AlertLog
    + SanctionStore
    + NotificationOutbox
    + AuthorizationStore
    + PresenceLog
    + AuditLog
    + Send
    + Sync
{
    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
