//! Enforcement cycle

use chrono::{DateTime, Local};
use parkwatch_api::{AlertEvent, Event, EventPayload};
use parkwatch_config::Config;
use parkwatch_core::{
    AlertEngine, AuthorizationGate, CoreError, CoreResult, MessageComposer, RosterRegistry,
    SanctionLedger, ScheduleRegistry, StorePresence,
};
use parkwatch_store::Store;
use parkwatch_util::EmployeeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Presence samples older than this are deleted at the end of a cycle
const PRESENCE_RETENTION_DAYS: i64 = 7;

/// A cycle stage that returned an error. Later stages still ran.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: CoreError,
}

/// Outcome of one evaluation cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub alerts: Vec<AlertEvent>,
    pub expired: Vec<EmployeeId>,
    /// Authorization flags repaired by reconciliation
    pub repaired: usize,
    pub pruned: usize,
    pub failures: Vec<StageFailure>,
}

impl CycleReport {
    /// Whether every stage succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn stage<T: Default>(&mut self, stage: &'static str, result: CoreResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                error!(stage, error = %e, "Cycle stage failed");
                self.failures.push(StageFailure { stage, error: e });
                T::default()
            }
        }
    }

    /// Events to broadcast to subscribed clients
    pub fn events(&self) -> Vec<Event> {
        let alerts = self
            .alerts
            .iter()
            .map(|a| Event::new(EventPayload::AlertRaised(a.clone())));
        let expired = self.expired.iter().map(|id| {
            Event::new(EventPayload::BanExpired {
                employee_id: id.clone(),
            })
        });
        alerts.chain(expired).collect()
    }

    /// Whether the cycle queued notification jobs
    pub fn queued_notifications(&self) -> bool {
        !self.alerts.is_empty()
    }
}

/// All enforcement components over one store
pub struct Enforcer {
    config: Config,
    store: Arc<dyn Store>,
    alerts: AlertEngine,
    ledger: SanctionLedger,
    cycle_running: AtomicBool,
}

impl Enforcer {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let registry: Arc<dyn ScheduleRegistry> =
            Arc::new(RosterRegistry::new(config.employees.clone()));
        let composer = MessageComposer::new(&config.notifications);
        let gate = Arc::new(AuthorizationGate::new(store.clone()));

        let alerts = AlertEngine::new(
            registry.clone(),
            Arc::new(StorePresence::new(store.clone())),
            store.clone(),
            config.policy.clone(),
            composer.clone(),
        );
        let ledger = SanctionLedger::new(
            store.clone(),
            registry,
            gate,
            composer,
            config.policy.ban_duration,
        );

        Self {
            config,
            store,
            alerts,
            ledger,
            cycle_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn ledger(&self) -> &SanctionLedger {
        &self.ledger
    }

    /// Run a cycle unless one is already in progress. `None` means the
    /// call was skipped.
    pub fn try_cycle(&self, now: DateTime<Local>) -> Option<CycleReport> {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _running = CycleFlag(&self.cycle_running);
        Some(self.run_cycle(now))
    }

    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Alerts first, then ban expiry, then reconciliation so a ban that just
    /// ended is reflected in the flags the same cycle. Every stage runs even
    /// when an earlier one fails; failures are listed in the report.
    pub fn run_cycle(&self, now: DateTime<Local>) -> CycleReport {
        let mut report = CycleReport::default();

        report.alerts = report.stage("alerts", self.alerts.evaluate(now));
        report.expired = report.stage("expire_bans", self.ledger.expire_bans(now));
        report.repaired = report.stage("reconcile", self.ledger.reconcile(now));
        if report.repaired > 0 {
            warn!(repaired = report.repaired, "Reconciliation repaired authorization flags");
        }

        let cutoff = now - chrono::Duration::days(PRESENCE_RETENTION_DAYS);
        report.pruned = match self.store.prune_presence(cutoff) {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(error = %e, "Failed to prune presence samples");
                0
            }
        };

        if !report.is_complete() {
            warn!(
                at = %now,
                alerts = report.alerts.len(),
                expired_bans = report.expired.len(),
                failed_stages = report.failures.len(),
                "Cycle finished with errors"
            );
        } else if report.alerts.is_empty() && report.expired.is_empty() {
            debug!(at = %now, "Cycle complete, nothing to report");
        } else {
            info!(
                at = %now,
                alerts = report.alerts.len(),
                expired_bans = report.expired.len(),
                "Cycle complete"
            );
        }
        report
    }
}

/// Clears the running flag when the cycle ends, including on panic
struct CycleFlag<'a>(&'a AtomicBool);

impl Drop for CycleFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parkwatch_store::{AuthorizationStore, SqliteStore};
    use parkwatch_util::VehicleId;

    const ROSTER: &str = r#"
config_version = 1

[[employees]]
id = "e-100"
name = "Amina"
spot = "A-12"

[[employees.vehicles]]
id = "v-100"

[employees.schedule]
days = "weekdays"
start = "09:00"
end = "17:00"

[[employees]]
id = "e-200"
name = "Karim"
spot = "B-07"

[[employees.vehicles]]
id = "v-200"

[employees.schedule]
days = "weekdays"
start = "09:00"
end = "17:00"
"#;

    // 2026-03-02 is a Monday
    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    #[test]
    fn overlapping_cycle_is_skipped() {
        let config = parkwatch_config::parse_config("config_version = 1").unwrap();
        let enforcer = Enforcer::new(config, Arc::new(SqliteStore::in_memory().unwrap()));
        let now = parkwatch_util::now();

        enforcer.cycle_running.store(true, Ordering::Release);
        assert!(enforcer.try_cycle(now).is_none());

        enforcer.cycle_running.store(false, Ordering::Release);
        let report = enforcer.try_cycle(now).unwrap();
        assert!(report.is_complete());
        assert!(report.alerts.is_empty());
        assert!(!enforcer.is_cycle_running());
    }

    #[test]
    fn ban_expiry_runs_when_alert_stage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parkwatchd.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let config = parkwatch_config::parse_config(ROSTER).unwrap();
        let enforcer = Enforcer::new(config, store.clone());

        let banned = EmployeeId::new("e-100");
        enforcer.ledger().record_complaint(&banned, at(2, 10, 0)).unwrap();
        enforcer.ledger().record_complaint(&banned, at(2, 10, 5)).unwrap();
        assert!(!store.is_vehicle_authorized(&VehicleId::new("v-100")).unwrap());

        // A flag nobody can read breaks evaluation of e-200 and reconciliation
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute(
            "INSERT INTO vehicle_authorization (vehicle_id, employee_id, authorized, updated_at) \
             VALUES ('v-200', 'e-200', 'unreadable', '2026-03-02T10:00:00+01:00')",
            [],
        )
        .unwrap();
        drop(raw);

        let report = enforcer.run_cycle(at(5, 10, 6));
        let failed: Vec<&str> = report.failures.iter().map(|f| f.stage).collect();
        assert_eq!(failed, vec!["alerts", "reconcile"]);
        assert!(!report.is_complete());

        // The expired ban was still lifted
        assert_eq!(report.expired, vec![banned.clone()]);
        assert!(enforcer.ledger().sanction(&banned).unwrap().active_ban.is_none());
        assert!(store.is_vehicle_authorized(&VehicleId::new("v-100")).unwrap());
    }
}
