//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use parkwatch_api::{
    AlertEvent, AlertKind, Ban, Complaint, JobStatus, NewAlert, NewNotification,
    NotificationChannel, NotificationJob, NotificationKind, NotificationPayload, PresenceSample,
    SanctionRecord,
};
use parkwatch_util::{EmployeeId, SpotId, VehicleId};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    AlertLog, AuditEvent, AuditLog, AuthorizationStore, ComplaintApplied, NotificationOutbox,
    PresenceLog, SanctionStore, SanctionTransition, Store, StoreError, StoreResult,
    VehicleAuthorization,
};

/// How long a statement waits on another connection's lock before
/// reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_timeout(path, BUSY_TIMEOUT)
    }

    /// Open with a custom lock wait. A zero timeout reports busy at once.
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Attendance alerts, at most one per employee/kind/window date
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                window_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                vehicles_json TEXT NOT NULL,
                message TEXT NOT NULL,
                UNIQUE (employee_id, kind, window_date)
            );

            -- One sanction record per employee
            CREATE TABLE IF NOT EXISTS sanctions (
                employee_id TEXT PRIMARY KEY,
                complaint_count INTEGER NOT NULL DEFAULT 0,
                ban_start TEXT,
                ban_end TEXT,
                updated_at TEXT
            );

            -- Applied complaints, keyed by the intake system's id
            CREATE TABLE IF NOT EXISTS complaints (
                complaint_id TEXT PRIMARY KEY,
                employee_id TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                evidence_ref TEXT,
                complainant_id TEXT,
                spot_id TEXT,
                recorded_at TEXT NOT NULL,
                resulting_count INTEGER NOT NULL
            );

            -- Notification outbox
            CREATE TABLE IF NOT EXISTS notification_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                channel TEXT NOT NULL,
                kind TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                next_attempt_at TEXT,
                next_attempt_ms INTEGER
            );

            -- Vehicle authorization flags (no row = authorized)
            CREATE TABLE IF NOT EXISTS vehicle_authorization (
                vehicle_id TEXT PRIMARY KEY,
                employee_id TEXT NOT NULL,
                authorized INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Presence feed readings
            CREATE TABLE IF NOT EXISTS presence_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vehicle_id TEXT NOT NULL,
                spot_id TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                observed_ms INTEGER NOT NULL,
                present INTEGER NOT NULL
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_alerts_employee ON alerts(employee_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON notification_jobs(status);
            CREATE INDEX IF NOT EXISTS idx_presence_lookup
                ON presence_samples(vehicle_id, spot_id, observed_ms);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

// Row conversion helpers

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_optional_timestamp(s: Option<String>) -> StoreResult<Option<DateTime<Local>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn parse_date(s: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Serialization(format!("bad date '{}': {}", s, e)))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn unknown(column: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("unknown {} '{}'", column, value))
}

struct AlertRow {
    id: i64,
    employee_id: String,
    kind: String,
    window_date: String,
    created_at: String,
    vehicles_json: String,
    message: String,
}

const ALERT_COLUMNS: &str =
    "id, employee_id, kind, window_date, created_at, vehicles_json, message";

impl AlertRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            kind: row.get(2)?,
            window_date: row.get(3)?,
            created_at: row.get(4)?,
            vehicles_json: row.get(5)?,
            message: row.get(6)?,
        })
    }

    fn into_alert(self) -> StoreResult<AlertEvent> {
        Ok(AlertEvent {
            id: self.id,
            employee_id: EmployeeId::new(self.employee_id),
            kind: AlertKind::parse(&self.kind).ok_or_else(|| unknown("alert kind", &self.kind))?,
            window_date: parse_date(&self.window_date)?,
            created_at: parse_timestamp(&self.created_at)?,
            vehicles: serde_json::from_str(&self.vehicles_json)?,
            message: self.message,
        })
    }
}

struct JobRow {
    id: i64,
    employee_id: String,
    recipient: String,
    channel: String,
    kind: String,
    subject: String,
    body: String,
    attempt_count: u32,
    status: String,
    last_error: Option<String>,
    created_at: String,
    next_attempt_at: Option<String>,
}

const JOB_COLUMNS: &str = "id, employee_id, recipient, channel, kind, subject, body, \
     attempt_count, status, last_error, created_at, next_attempt_at";

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            recipient: row.get(2)?,
            channel: row.get(3)?,
            kind: row.get(4)?,
            subject: row.get(5)?,
            body: row.get(6)?,
            attempt_count: row.get(7)?,
            status: row.get(8)?,
            last_error: row.get(9)?,
            created_at: row.get(10)?,
            next_attempt_at: row.get(11)?,
        })
    }

    fn into_job(self) -> StoreResult<NotificationJob> {
        Ok(NotificationJob {
            id: self.id,
            employee_id: EmployeeId::new(self.employee_id),
            recipient: self.recipient,
            channel: NotificationChannel::parse(&self.channel)
                .ok_or_else(|| unknown("channel", &self.channel))?,
            kind: NotificationKind::parse(&self.kind)
                .ok_or_else(|| unknown("notification kind", &self.kind))?,
            payload: NotificationPayload {
                subject: self.subject,
                body: self.body,
            },
            attempt_count: self.attempt_count,
            status: JobStatus::parse(&self.status).ok_or_else(|| unknown("status", &self.status))?,
            last_error: self.last_error,
            created_at: parse_timestamp(&self.created_at)?,
            next_attempt_at: parse_optional_timestamp(self.next_attempt_at)?,
        })
    }
}

fn collect_jobs(
    rows: impl Iterator<Item = rusqlite::Result<JobRow>>,
) -> StoreResult<Vec<NotificationJob>> {
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row?.into_job()?);
    }
    Ok(jobs)
}

fn load_job(conn: &Connection, id: i64) -> StoreResult<Option<NotificationJob>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM notification_jobs WHERE id = ?", JOB_COLUMNS),
            [id],
            JobRow::read,
        )
        .optional()?;
    row.map(JobRow::into_job).transpose()
}

fn insert_jobs(
    conn: &Connection,
    notifications: &[NewNotification],
    at: DateTime<Local>,
) -> StoreResult<Vec<NotificationJob>> {
    let mut jobs = Vec::with_capacity(notifications.len());
    for notification in notifications {
        conn.execute(
            r#"
            INSERT INTO notification_jobs
                (employee_id, recipient, channel, kind, subject, body, attempt_count, status,
                 created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
            params![
                notification.employee_id.as_str(),
                notification.recipient,
                notification.channel.as_str(),
                notification.kind.as_str(),
                notification.payload.subject,
                notification.payload.body,
                JobStatus::Pending.as_str(),
                at.to_rfc3339(),
            ],
        )?;

        jobs.push(NotificationJob {
            id: conn.last_insert_rowid(),
            employee_id: notification.employee_id.clone(),
            recipient: notification.recipient.clone(),
            channel: notification.channel,
            kind: notification.kind,
            payload: notification.payload.clone(),
            attempt_count: 0,
            status: JobStatus::Pending,
            last_error: None,
            created_at: at,
            next_attempt_at: None,
        });
    }
    Ok(jobs)
}

struct SanctionRow {
    employee_id: String,
    complaint_count: u32,
    ban_start: Option<String>,
    ban_end: Option<String>,
    updated_at: Option<String>,
}

const SANCTION_COLUMNS: &str = "employee_id, complaint_count, ban_start, ban_end, updated_at";

impl SanctionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            employee_id: row.get(0)?,
            complaint_count: row.get(1)?,
            ban_start: row.get(2)?,
            ban_end: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_record(self) -> StoreResult<SanctionRecord> {
        let active_ban = match (self.ban_start, self.ban_end) {
            (Some(start), Some(end)) => Some(Ban {
                start: parse_timestamp(&start)?,
                end: parse_timestamp(&end)?,
            }),
            _ => None,
        };

        Ok(SanctionRecord {
            employee_id: EmployeeId::new(self.employee_id),
            complaint_count: self.complaint_count,
            active_ban,
            updated_at: parse_optional_timestamp(self.updated_at)?,
        })
    }
}

fn load_sanction(conn: &Connection, employee_id: &EmployeeId) -> StoreResult<SanctionRecord> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM sanctions WHERE employee_id = ?", SANCTION_COLUMNS),
            [employee_id.as_str()],
            SanctionRow::read,
        )
        .optional()?;

    match row {
        Some(row) => row.into_record(),
        None => Ok(SanctionRecord::clean(employee_id.clone())),
    }
}

fn write_sanction(conn: &Connection, record: &SanctionRecord) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO sanctions (employee_id, complaint_count, ban_start, ban_end, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(employee_id)
        DO UPDATE SET complaint_count = excluded.complaint_count,
                      ban_start = excluded.ban_start,
                      ban_end = excluded.ban_end,
                      updated_at = excluded.updated_at
        "#,
        params![
            record.employee_id.as_str(),
            record.complaint_count,
            record.active_ban.map(|b| b.start.to_rfc3339()),
            record.active_ban.map(|b| b.end.to_rfc3339()),
            record.updated_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

impl AlertLog for SqliteStore {
    fn record_alert(
        &self,
        alert: &NewAlert,
        at: DateTime<Local>,
        notifications: &[NewNotification],
    ) -> StoreResult<Option<AlertEvent>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let vehicles_json = serde_json::to_string(&alert.vehicles)?;
        let inserted = tx.execute(
            r#"
            INSERT INTO alerts (employee_id, kind, window_date, created_at, vehicles_json, message)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(employee_id, kind, window_date) DO NOTHING
            "#,
            params![
                alert.employee_id.as_str(),
                alert.kind.as_str(),
                format_date(alert.window_date),
                at.to_rfc3339(),
                vehicles_json,
                alert.message,
            ],
        )?;

        if inserted == 0 {
            debug!(
                employee_id = %alert.employee_id,
                kind = alert.kind.as_str(),
                window_date = %alert.window_date,
                "Alert already recorded"
            );
            return Ok(None);
        }

        let id = tx.last_insert_rowid();
        let jobs = insert_jobs(&tx, notifications, at)?;
        tx.commit()?;

        debug!(alert_id = id, jobs = jobs.len(), "Alert recorded");
        Ok(Some(AlertEvent {
            id,
            employee_id: alert.employee_id.clone(),
            kind: alert.kind,
            window_date: alert.window_date,
            created_at: at,
            vehicles: alert.vehicles.clone(),
            message: alert.message.clone(),
        }))
    }

    fn alert_exists(
        &self,
        employee_id: &EmployeeId,
        kind: AlertKind,
        window_date: NaiveDate,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM alerts WHERE employee_id = ? AND kind = ? AND window_date = ?",
                params![employee_id.as_str(), kind.as_str(), format_date(window_date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_alerts(
        &self,
        employee_id: Option<&EmployeeId>,
        limit: usize,
    ) -> StoreResult<Vec<AlertEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE (?1 IS NULL OR employee_id = ?1) \
             ORDER BY id DESC LIMIT ?2",
            ALERT_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![employee_id.map(|e| e.as_str()), limit as i64],
            AlertRow::read,
        )?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?.into_alert()?);
        }
        Ok(alerts)
    }
}

impl SanctionStore for SqliteStore {
    fn get_sanction(&self, employee_id: &EmployeeId) -> StoreResult<SanctionRecord> {
        let conn = self.lock()?;
        load_sanction(&conn, employee_id)
    }

    fn list_banned(&self) -> StoreResult<Vec<SanctionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sanctions WHERE ban_end IS NOT NULL ORDER BY employee_id",
            SANCTION_COLUMNS
        ))?;
        let rows = stmt.query_map([], SanctionRow::read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    fn apply_complaint(
        &self,
        complaint: &Complaint,
        at: DateTime<Local>,
        decide: &dyn Fn(&SanctionRecord) -> SanctionTransition,
    ) -> StoreResult<ComplaintApplied> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let seen: Option<String> = tx
            .query_row(
                "SELECT employee_id FROM complaints WHERE complaint_id = ?",
                [complaint.complaint_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if seen.is_some() {
            debug!(complaint_id = %complaint.complaint_id, "Complaint already applied");
            return Ok(ComplaintApplied::Duplicate);
        }

        let previous = load_sanction(&tx, &complaint.employee_id)?;
        let transition = decide(&previous);
        let record = transition.record;

        if record.employee_id != previous.employee_id {
            return Err(StoreError::Invariant(format!(
                "transition for {} produced a record for {}",
                previous.employee_id, record.employee_id
            )));
        }
        if record.complaint_count < previous.complaint_count {
            return Err(StoreError::Invariant(format!(
                "complaint count for {} would decrease from {} to {}",
                record.employee_id, previous.complaint_count, record.complaint_count
            )));
        }

        write_sanction(&tx, &record)?;
        tx.execute(
            r#"
            INSERT INTO complaints
                (complaint_id, employee_id, submitted_at, evidence_ref, complainant_id, spot_id,
                 recorded_at, resulting_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                complaint.complaint_id.as_str(),
                complaint.employee_id.as_str(),
                complaint.submitted_at.to_rfc3339(),
                complaint.evidence_ref,
                complaint.complainant_id.as_ref().map(|c| c.as_str()),
                complaint.spot_id.as_ref().map(|s| s.as_str()),
                at.to_rfc3339(),
                record.complaint_count,
            ],
        )?;
        let jobs = insert_jobs(&tx, &transition.notifications, at)?;
        tx.commit()?;

        debug!(
            employee_id = %record.employee_id,
            complaint_count = record.complaint_count,
            jobs = jobs.len(),
            "Sanction record updated"
        );
        Ok(ComplaintApplied::Applied {
            previous,
            record,
            jobs,
        })
    }

    fn clear_expired_ban(
        &self,
        employee_id: &EmployeeId,
        now: DateTime<Local>,
    ) -> StoreResult<Option<SanctionRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut record = load_sanction(&tx, employee_id)?;
        match record.active_ban {
            Some(ban) if ban.is_expired(now) => {}
            _ => return Ok(None),
        }

        record.active_ban = None;
        record.updated_at = Some(now);
        write_sanction(&tx, &record)?;
        tx.commit()?;

        debug!(employee_id = %employee_id, "Ban cleared");
        Ok(Some(record))
    }
}

impl NotificationOutbox for SqliteStore {
    fn due_notifications(
        &self,
        now: DateTime<Local>,
        max_attempts: u32,
        limit: usize,
    ) -> StoreResult<Vec<NotificationJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM notification_jobs
            WHERE status = ?1
               OR (status = ?2
                   AND attempt_count < ?3
                   AND (next_attempt_ms IS NULL OR next_attempt_ms <= ?4))
            ORDER BY id
            LIMIT ?5
            "#,
            JOB_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![
                JobStatus::Pending.as_str(),
                JobStatus::Failed.as_str(),
                max_attempts,
                now.timestamp_millis(),
                limit as i64,
            ],
            JobRow::read,
        )?;
        collect_jobs(rows)
    }

    fn get_notification(&self, id: i64) -> StoreResult<Option<NotificationJob>> {
        let conn = self.lock()?;
        load_job(&conn, id)
    }

    fn list_notifications(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> StoreResult<Vec<NotificationJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notification_jobs WHERE (?1 IS NULL OR status = ?1) \
             ORDER BY id DESC LIMIT ?2",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            JobRow::read,
        )?;
        collect_jobs(rows)
    }

    fn count_notifications(&self, status: JobStatus) -> StoreResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notification_jobs WHERE status = ?",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn mark_sent(&self, id: i64, at: DateTime<Local>) -> StoreResult<NotificationJob> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE notification_jobs
            SET status = ?, attempt_count = attempt_count + 1, last_error = NULL,
                next_attempt_at = NULL, next_attempt_ms = NULL
            WHERE id = ?
            "#,
            params![JobStatus::Sent.as_str(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("notification job {}", id)));
        }

        debug!(job_id = id, sent_at = %at, "Notification marked sent");
        load_job(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("notification job {}", id)))
    }

    fn mark_failed(
        &self,
        id: i64,
        error: &str,
        retry_at: Option<DateTime<Local>>,
    ) -> StoreResult<NotificationJob> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE notification_jobs
            SET status = ?, attempt_count = attempt_count + 1, last_error = ?,
                next_attempt_at = ?, next_attempt_ms = ?
            WHERE id = ?
            "#,
            params![
                JobStatus::Failed.as_str(),
                error,
                retry_at.map(|t| t.to_rfc3339()),
                retry_at.map(|t| t.timestamp_millis()),
                id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("notification job {}", id)));
        }

        debug!(job_id = id, error = %error, "Notification marked failed");
        load_job(&conn, id)?.ok_or_else(|| StoreError::NotFound(format!("notification job {}", id)))
    }

    fn requeue_notification(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock()?;
        let updated = conn.execute(
            r#"
            UPDATE notification_jobs
            SET status = ?, next_attempt_at = NULL, next_attempt_ms = NULL
            WHERE id = ? AND status = ?
            "#,
            params![JobStatus::Pending.as_str(), id, JobStatus::Failed.as_str()],
        )?;
        Ok(updated == 1)
    }
}

impl AuthorizationStore for SqliteStore {
    fn set_vehicle_authorized(
        &self,
        vehicle_id: &VehicleId,
        employee_id: &EmployeeId,
        authorized: bool,
        at: DateTime<Local>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;

        let current: Option<bool> = conn
            .query_row(
                "SELECT authorized FROM vehicle_authorization WHERE vehicle_id = ?",
                [vehicle_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if current == Some(authorized) {
            return Ok(false);
        }

        conn.execute(
            r#"
            INSERT INTO vehicle_authorization (vehicle_id, employee_id, authorized, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(vehicle_id)
            DO UPDATE SET employee_id = excluded.employee_id,
                          authorized = excluded.authorized,
                          updated_at = excluded.updated_at
            "#,
            params![vehicle_id.as_str(), employee_id.as_str(), authorized, at.to_rfc3339()],
        )?;

        Ok(current.unwrap_or(true) != authorized)
    }

    fn is_vehicle_authorized(&self, vehicle_id: &VehicleId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let authorized: Option<bool> = conn
            .query_row(
                "SELECT authorized FROM vehicle_authorization WHERE vehicle_id = ?",
                [vehicle_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(authorized.unwrap_or(true))
    }

    fn list_vehicle_authorizations(&self) -> StoreResult<Vec<VehicleAuthorization>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT vehicle_id, employee_id, authorized, updated_at \
             FROM vehicle_authorization ORDER BY vehicle_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let vehicle_id: String = row.get(0)?;
            let employee_id: String = row.get(1)?;
            let authorized: bool = row.get(2)?;
            let updated_at: String = row.get(3)?;
            Ok((vehicle_id, employee_id, authorized, updated_at))
        })?;

        let mut flags = Vec::new();
        for row in rows {
            let (vehicle_id, employee_id, authorized, updated_at) = row?;
            flags.push(VehicleAuthorization {
                vehicle_id: VehicleId::new(vehicle_id),
                employee_id: EmployeeId::new(employee_id),
                authorized,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(flags)
    }
}

impl PresenceLog for SqliteStore {
    fn record_presence(&self, sample: &PresenceSample) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO presence_samples (vehicle_id, spot_id, observed_at, observed_ms, present)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                sample.vehicle_id.as_str(),
                sample.spot_id.as_str(),
                sample.observed_at.to_rfc3339(),
                sample.observed_at.timestamp_millis(),
                sample.present,
            ],
        )?;
        Ok(())
    }

    fn latest_presence(
        &self,
        vehicle_id: &VehicleId,
        spot_id: &SpotId,
        at: DateTime<Local>,
    ) -> StoreResult<Option<PresenceSample>> {
        let conn = self.lock()?;
        let row: Option<(String, bool)> = conn
            .query_row(
                r#"
                SELECT observed_at, present FROM presence_samples
                WHERE vehicle_id = ? AND spot_id = ? AND observed_ms <= ?
                ORDER BY observed_ms DESC, id DESC
                LIMIT 1
                "#,
                params![vehicle_id.as_str(), spot_id.as_str(), at.timestamp_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(observed_at, present)| {
            Ok(PresenceSample {
                vehicle_id: vehicle_id.clone(),
                spot_id: spot_id.clone(),
                observed_at: parse_timestamp(&observed_at)?,
                present,
            })
        })
        .transpose()
    }

    fn prune_presence(&self, before: DateTime<Local>) -> StoreResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM presence_samples WHERE observed_ms < ?",
            [before.timestamp_millis()],
        )?;
        if removed > 0 {
            debug!(removed, "Pruned presence samples");
        }
        Ok(removed)
    }
}

impl AuditLog for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            events.push(AuditEvent {
                id,
                timestamp: parse_timestamp(&timestamp_str)?,
                event: serde_json::from_str(&event_json)?,
            });
        }

        Ok(events)
    }
}

impl Store for SqliteStore {
    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
