//! Sanction ledger: complaint escalation and ban lifecycle
//!
//! Per employee:
//!
//! ```text
//! CLEAN (0) --complaint--> WARNED (1) --complaint--> BANNED (>=2, ban set)
//!                                                        |
//!                               ban end reached <--------+  (count kept)
//! ```
//!
//! A complaint arriving while a ban is still running raises the count but
//! imposes no second ban. A complaint arriving after the ban ended, with the
//! count already at 2 or more, imposes a fresh ban of the same length.

use chrono::{DateTime, Local};
use parkwatch_api::{Ban, Complaint, SanctionOutcome, SanctionRecord};
use parkwatch_config::Employee;
use parkwatch_store::{AuditEvent, AuditEventType, ComplaintApplied, SanctionTransition, Store};
use parkwatch_util::{ComplaintId, EmployeeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    AuthorizationGate, CoreError, CoreResult, LedgerToken, MessageComposer, ScheduleRegistry,
};

/// What a complaint does to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Warn,
    Ban(Ban),
    /// Count raised under a running ban
    AlreadyBanned,
}

/// Escalation transition function
pub fn escalate(
    record: &SanctionRecord,
    at: DateTime<Local>,
    ban_duration: chrono::Duration,
) -> (SanctionRecord, Escalation) {
    let mut next = record.clone();
    next.complaint_count = record.complaint_count.saturating_add(1);
    next.updated_at = Some(at);

    let escalation = if next.complaint_count == 1 {
        Escalation::Warn
    } else if record.is_banned_at(at) {
        Escalation::AlreadyBanned
    } else {
        let ban = Ban {
            start: at,
            end: at + ban_duration,
        };
        next.active_ban = Some(ban);
        Escalation::Ban(ban)
    };

    (next, escalation)
}

/// Retry policy for busy-database conflicts
#[derive(Debug, Clone, Copy)]
pub struct ConflictRetry {
    pub max_attempts: u32,
    /// Sleep before retry n is `backoff * n`
    pub backoff: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Durable per-employee complaint counts and bans. The only writer of ban
/// state, and the only caller of the authorization gate.
pub struct SanctionLedger {
    store: Arc<dyn Store>,
    registry: Arc<dyn ScheduleRegistry>,
    gate: Arc<AuthorizationGate>,
    composer: MessageComposer,
    ban_duration: chrono::Duration,
    retry: ConflictRetry,
    locks: Mutex<HashMap<EmployeeId, Arc<Mutex<()>>>>,
}

impl SanctionLedger {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<dyn ScheduleRegistry>,
        gate: Arc<AuthorizationGate>,
        composer: MessageComposer,
        ban_duration: chrono::Duration,
    ) -> Self {
        Self {
            store,
            registry,
            gate,
            composer,
            ban_duration,
            retry: ConflictRetry::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: ConflictRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    pub fn sanction(&self, employee_id: &EmployeeId) -> CoreResult<SanctionRecord> {
        Ok(self.store.get_sanction(employee_id)?)
    }

    /// Record a complaint that arrived without an intake id
    pub fn record_complaint(
        &self,
        employee_id: &EmployeeId,
        at: DateTime<Local>,
    ) -> CoreResult<SanctionOutcome> {
        let complaint = Complaint {
            complaint_id: ComplaintId::generate(),
            employee_id: employee_id.clone(),
            submitted_at: at,
            evidence_ref: None,
            complainant_id: None,
            spot_id: None,
        };
        self.accept_complaint(&complaint, at)
    }

    /// Apply one accepted complaint. Idempotent on `complaint_id`.
    pub fn accept_complaint(
        &self,
        complaint: &Complaint,
        at: DateTime<Local>,
    ) -> CoreResult<SanctionOutcome> {
        let employee = self
            .registry
            .employee(&complaint.employee_id)?
            .ok_or_else(|| CoreError::UnknownEmployee(complaint.employee_id.clone()))?;

        let lock = self.employee_lock(&employee.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let decide = |record: &SanctionRecord| {
            let (next, escalation) = escalate(record, at, self.ban_duration);
            let notifications = match escalation {
                Escalation::Warn => self.composer.warning(&employee, self.ban_duration),
                Escalation::Ban(ban) => self.composer.ban(&employee, &ban),
                Escalation::AlreadyBanned => Vec::new(),
            };
            SanctionTransition {
                record: next,
                notifications,
            }
        };

        let applied = self.apply_with_retry(complaint, at, &decide)?;
        let (previous, record) = match applied {
            ComplaintApplied::Applied {
                previous, record, ..
            } => (previous, record),
            ComplaintApplied::Duplicate => {
                info!(
                    complaint_id = %complaint.complaint_id,
                    employee_id = %employee.id,
                    "Duplicate complaint ignored"
                );
                return Ok(SanctionOutcome::Duplicate {
                    complaint_id: complaint.complaint_id.clone(),
                });
            }
        };

        // Same inputs as inside the transaction
        let (_, escalation) = escalate(&previous, at, self.ban_duration);

        info!(
            employee_id = %employee.id,
            complaint_id = %complaint.complaint_id,
            complaint_count = record.complaint_count,
            escalation = ?escalation,
            "Complaint recorded"
        );
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::SanctionChanged {
                employee_id: employee.id.clone(),
                complaint_id: complaint.complaint_id.clone(),
                complaint_count: record.complaint_count,
                state: record.state(),
            }));

        Ok(match escalation {
            Escalation::Warn => SanctionOutcome::Warned { record },
            Escalation::Ban(ban) => {
                // Committed already; a failed gate write is repaired by reconcile
                if let Err(e) = self.apply_authorization(&employee, false, at) {
                    error!(
                        employee_id = %employee.id,
                        error = %e,
                        "Failed to deauthorize vehicles"
                    );
                }
                SanctionOutcome::Banned { record, ban }
            }
            Escalation::AlreadyBanned => SanctionOutcome::AlreadyBanned { record },
        })
    }

    /// Clear every ban whose end is at or before `now` and reauthorize the
    /// affected vehicles. Complaint counts are not touched.
    pub fn expire_bans(&self, now: DateTime<Local>) -> CoreResult<Vec<EmployeeId>> {
        let due: Vec<SanctionRecord> = self
            .store
            .list_banned()?
            .into_iter()
            .filter(|r| r.active_ban.is_some_and(|b| b.is_expired(now)))
            .collect();

        let mut expired = Vec::new();
        for record in due {
            let employee_id = record.employee_id;
            let lock = self.employee_lock(&employee_id);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

            let Some(cleared) = self.store.clear_expired_ban(&employee_id, now)? else {
                continue;
            };

            info!(
                employee_id = %employee_id,
                complaint_count = cleared.complaint_count,
                "Ban expired"
            );
            let _ = self
                .store
                .append_audit(AuditEvent::new(AuditEventType::BanExpired {
                    employee_id: employee_id.clone(),
                }));

            match self.registry.employee(&employee_id)? {
                Some(employee) => {
                    if let Err(e) = self.apply_authorization(&employee, true, now) {
                        error!(
                            employee_id = %employee_id,
                            error = %e,
                            "Failed to reauthorize vehicles"
                        );
                    }
                }
                None => {
                    self.reauthorize_orphans(&employee_id, now)?;
                }
            }

            expired.push(employee_id);
        }

        Ok(expired)
    }

    /// Re-derive every vehicle's flag from the ledger. Repairs drift left by
    /// a crash between a ledger commit and the matching gate write. Returns
    /// the number of flags changed.
    pub fn reconcile(&self, now: DateTime<Local>) -> CoreResult<usize> {
        let token = LedgerToken::new();
        let banned: HashSet<EmployeeId> = self
            .store
            .list_banned()?
            .into_iter()
            .filter(|r| r.is_banned_at(now))
            .map(|r| r.employee_id)
            .collect();

        let mut changed = 0;
        let mut known = HashSet::new();
        for employee in self.registry.employees()? {
            let authorized = !banned.contains(&employee.id);
            for vehicle in &employee.vehicles {
                known.insert(vehicle.id.clone());
                if self
                    .gate
                    .set_authorized(&token, &vehicle.id, &employee.id, authorized, now)?
                {
                    changed += 1;
                }
            }
        }

        // Vehicles no longer on the roster fall back to their owner's record
        for flag in self.store.list_vehicle_authorizations()? {
            if known.contains(&flag.vehicle_id) {
                continue;
            }
            let authorized = !banned.contains(&flag.employee_id);
            if self
                .gate
                .set_authorized(&token, &flag.vehicle_id, &flag.employee_id, authorized, now)?
            {
                changed += 1;
            }
        }

        if changed > 0 {
            warn!(changed, "Reconciled vehicle authorization with sanction records");
        } else {
            debug!("Vehicle authorization consistent with sanction records");
        }
        Ok(changed)
    }

    fn apply_authorization(
        &self,
        employee: &Employee,
        authorized: bool,
        at: DateTime<Local>,
    ) -> CoreResult<()> {
        let token = LedgerToken::new();
        for vehicle in &employee.vehicles {
            self.gate
                .set_authorized(&token, &vehicle.id, &employee.id, authorized, at)?;
        }
        Ok(())
    }

    fn reauthorize_orphans(&self, employee_id: &EmployeeId, at: DateTime<Local>) -> CoreResult<()> {
        let token = LedgerToken::new();
        for flag in self.store.list_vehicle_authorizations()? {
            if &flag.employee_id == employee_id {
                self.gate
                    .set_authorized(&token, &flag.vehicle_id, employee_id, true, at)?;
            }
        }
        Ok(())
    }

    fn apply_with_retry(
        &self,
        complaint: &Complaint,
        at: DateTime<Local>,
        decide: &dyn Fn(&SanctionRecord) -> SanctionTransition,
    ) -> CoreResult<ComplaintApplied> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.apply_complaint(complaint, at, decide) {
                Ok(applied) => return Ok(applied),
                Err(e) if e.is_busy() && attempt < self.retry.max_attempts => {
                    warn!(
                        employee_id = %complaint.employee_id,
                        attempt,
                        reason = %e,
                        "Sanction update conflicted, retrying"
                    );
                    std::thread::sleep(self.retry.backoff * attempt);
                }
                Err(e) if e.is_busy() => {
                    return Err(CoreError::Conflict {
                        employee_id: complaint.employee_id.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn employee_lock(&self, employee_id: &EmployeeId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(employee_id.clone()).or_default().clone()
    }
}
