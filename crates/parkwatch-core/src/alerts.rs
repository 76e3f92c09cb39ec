//! Alert engine: attendance rules evaluated against presence

use chrono::{DateTime, Local};
use parkwatch_api::{AlertEvent, AlertKind, NewAlert, VehicleClass};
use parkwatch_config::{EnforcementPolicy, Employee};
use parkwatch_store::{AuditEvent, AuditEventType, Store};
use parkwatch_util::WindowOccurrence;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{CoreError, CoreResult, MessageComposer, PresenceSource, ScheduleRegistry};

/// Evaluates ordinary-class employees against the late-arrival rule and
/// state-class employees against the night-presence rule only. Re-running for the same instant is a
/// no-op: alerts are unique per (employee, kind, window date).
pub struct AlertEngine {
    registry: Arc<dyn ScheduleRegistry>,
    presence: Arc<dyn PresenceSource>,
    store: Arc<dyn Store>,
    policy: EnforcementPolicy,
    composer: MessageComposer,
}

impl AlertEngine {
    pub fn new(
        registry: Arc<dyn ScheduleRegistry>,
        presence: Arc<dyn PresenceSource>,
        store: Arc<dyn Store>,
        policy: EnforcementPolicy,
        composer: MessageComposer,
    ) -> Self {
        Self {
            registry,
            presence,
            store,
            policy,
            composer,
        }
    }

    /// Returns the alerts created by this call; already-recorded ones are not
    /// repeated. A presence failure skips that employee for this cycle only.
    pub fn evaluate(&self, now: DateTime<Local>) -> CoreResult<Vec<AlertEvent>> {
        let employees = self.registry.employees()?;
        let mut created = Vec::new();

        for employee in &employees {
            match self.evaluate_employee(employee, now) {
                Ok(alerts) => created.extend(alerts),
                Err(CoreError::Presence(reason)) => {
                    warn!(
                        employee_id = %employee.id,
                        reason = %reason,
                        "Presence unavailable, employee skipped this cycle"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            employees = employees.len(),
            created = created.len(),
            "Evaluation cycle complete"
        );
        Ok(created)
    }

    fn evaluate_employee(
        &self,
        employee: &Employee,
        now: DateTime<Local>,
    ) -> CoreResult<Vec<AlertEvent>> {
        if self.is_banned(employee)? {
            debug!(employee_id = %employee.id, "Vehicles deauthorized, not evaluated");
            return Ok(Vec::new());
        }

        // State vehicles owe night presence, daytime absence is not a violation
        let alert = match employee.vehicle_class {
            VehicleClass::Ordinary => self.check_late(employee, now)?,
            VehicleClass::State => self.check_night(employee, now)?,
        };
        Ok(alert.into_iter().collect())
    }

    /// Violated once `now >= start + grace`, until the schedule window ends
    fn check_late(
        &self,
        employee: &Employee,
        now: DateTime<Local>,
    ) -> CoreResult<Option<AlertEvent>> {
        let Some(occurrence) = employee.schedule.occurrence_at(&now) else {
            return Ok(None);
        };
        if now < occurrence.start + self.policy.grace {
            return Ok(None);
        }
        if employee.is_on_leave(occurrence.window_date) {
            debug!(
                employee_id = %employee.id,
                date = %occurrence.window_date,
                "On approved leave"
            );
            return Ok(None);
        }
        if self
            .store
            .alert_exists(&employee.id, AlertKind::LateAbsent, occurrence.window_date)?
        {
            return Ok(None);
        }
        if self.spot_occupied(employee, now, self.policy.presence_max_age)? {
            return Ok(None);
        }

        let alert = NewAlert {
            employee_id: employee.id.clone(),
            kind: AlertKind::LateAbsent,
            window_date: occurrence.window_date,
            vehicles: employee.vehicle_ids(),
            message: MessageComposer::late_absent_summary(employee, &occurrence),
        };
        let jobs = self.composer.late_absent(employee, &occurrence);
        self.record(alert, now, &jobs, &occurrence)
    }

    /// State vehicles must be on site throughout the night window
    fn check_night(
        &self,
        employee: &Employee,
        now: DateTime<Local>,
    ) -> CoreResult<Option<AlertEvent>> {
        let Some(occurrence) = self.policy.night_window.occurrence_at(&now) else {
            return Ok(None);
        };
        if self.store.alert_exists(
            &employee.id,
            AlertKind::NightAbsentState,
            occurrence.window_date,
        )? {
            return Ok(None);
        }
        if self.spot_occupied(employee, now, self.policy.night_presence_max_age)? {
            return Ok(None);
        }

        let alert = NewAlert {
            employee_id: employee.id.clone(),
            kind: AlertKind::NightAbsentState,
            window_date: occurrence.window_date,
            vehicles: employee.vehicle_ids(),
            message: MessageComposer::night_absent_summary(employee, &occurrence),
        };
        let jobs = self.composer.night_absent(employee, &occurrence);
        self.record(alert, now, &jobs, &occurrence)
    }

    /// Missing and stale samples both count as absent
    fn spot_occupied(
        &self,
        employee: &Employee,
        now: DateTime<Local>,
        max_age: chrono::Duration,
    ) -> CoreResult<bool> {
        for vehicle in &employee.vehicles {
            let Some(sample) = self.presence.sample(&vehicle.id, &employee.spot, now)? else {
                continue;
            };
            if !sample.present {
                continue;
            }
            if now - sample.observed_at <= max_age {
                return Ok(true);
            }
            debug!(
                employee_id = %employee.id,
                vehicle_id = %vehicle.id,
                observed_at = %sample.observed_at,
                "Presence sample stale"
            );
        }
        Ok(false)
    }

    fn is_banned(&self, employee: &Employee) -> CoreResult<bool> {
        if employee.vehicles.is_empty() {
            return Ok(false);
        }
        for vehicle in &employee.vehicles {
            if self.store.is_vehicle_authorized(&vehicle.id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn record(
        &self,
        alert: NewAlert,
        now: DateTime<Local>,
        jobs: &[parkwatch_api::NewNotification],
        occurrence: &WindowOccurrence,
    ) -> CoreResult<Option<AlertEvent>> {
        let Some(event) = self.store.record_alert(&alert, now, jobs)? else {
            // Lost a race with a concurrent cycle
            return Ok(None);
        };

        info!(
            alert_id = event.id,
            employee_id = %event.employee_id,
            kind = event.kind.as_str(),
            window_date = %event.window_date,
            window_start = %occurrence.start,
            notifications = jobs.len(),
            "Alert raised"
        );
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::AlertRaised {
                alert_id: event.id,
                employee_id: event.employee_id.clone(),
                kind: event.kind,
                window_date: event.window_date,
            }));

        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RosterRegistry, StorePresence};
    use chrono::{NaiveDate, TimeZone};
    use parkwatch_api::{JobStatus, NotificationChannel, PresenceSample};
    use parkwatch_config::{Leave, Vehicle};
    use parkwatch_store::{
        AlertLog, AuthorizationStore, NotificationOutbox, PresenceLog, SqliteStore,
    };
    use parkwatch_util::{DaysOfWeek, EmployeeId, SpotId, TimeWindow, VehicleId, WallClock};

    // 2026-03-02 is a Monday
    fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn employee(id: &str, class: VehicleClass) -> Employee {
        Employee {
            id: EmployeeId::new(id),
            name: id.to_uppercase(),
            email: Some(format!("{}@example.org", id)),
            phone: Some("+21620000000".into()),
            spot: SpotId::new(format!("spot-{}", id)),
            vehicle_class: class,
            vehicles: vec![Vehicle {
                id: VehicleId::new(format!("car-{}", id)),
                plate: None,
            }],
            schedule: TimeWindow::new(
                DaysOfWeek::WEEKDAYS,
                WallClock::new(9, 0).unwrap(),
                WallClock::new(17, 0).unwrap(),
            ),
            leave: vec![],
        }
    }

    fn engine_for(employees: Vec<Employee>) -> (Arc<SqliteStore>, AlertEngine) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = AlertEngine::new(
            Arc::new(RosterRegistry::new(employees)),
            Arc::new(StorePresence::new(store.clone())),
            store.clone(),
            EnforcementPolicy::default(),
            MessageComposer::all_channels("HQ"),
        );
        (store, engine)
    }

    fn report(
        store: &SqliteStore,
        employee: &Employee,
        observed_at: DateTime<Local>,
        present: bool,
    ) {
        store
            .record_presence(&PresenceSample {
                vehicle_id: employee.vehicles[0].id.clone(),
                spot_id: employee.spot.clone(),
                observed_at,
                present,
            })
            .unwrap();
    }

    struct FailingPresence;

    impl PresenceSource for FailingPresence {
        fn sample(
            &self,
            _vehicle_id: &VehicleId,
            _spot_id: &SpotId,
            _at: DateTime<Local>,
        ) -> CoreResult<Option<PresenceSample>> {
            Err(CoreError::Presence("camera feed unreachable".into()))
        }
    }

    #[test]
    fn absent_at_grace_cutoff_raises_one_alert_and_two_jobs() {
        let (store, engine) = engine_for(vec![employee("e-1", VehicleClass::Ordinary)]);

        let alerts = engine.evaluate(at(2, 9, 1)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LateAbsent);
        assert_eq!(alerts[0].window_date, date(2));

        let jobs = store.list_notifications(Some(JobStatus::Pending), 10).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.channel == NotificationChannel::Email));
        assert!(jobs.iter().any(|j| j.channel == NotificationChannel::Sms));
    }

    #[test]
    fn before_grace_cutoff_no_alert() {
        let (_store, engine) = engine_for(vec![employee("e-1", VehicleClass::Ordinary)]);
        let just_before = at(2, 9, 0) + chrono::Duration::seconds(59);
        assert!(engine.evaluate(just_before).unwrap().is_empty());
    }

    #[test]
    fn re_evaluation_is_idempotent() {
        let (store, engine) = engine_for(vec![employee("e-1", VehicleClass::Ordinary)]);

        assert_eq!(engine.evaluate(at(2, 9, 1)).unwrap().len(), 1);
        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
        assert!(engine.evaluate(at(2, 14, 0)).unwrap().is_empty());

        assert_eq!(store.list_alerts(None, 10).unwrap().len(), 1);
        assert_eq!(store.count_notifications(JobStatus::Pending).unwrap(), 2);

        // Next working day is a new window
        assert_eq!(engine.evaluate(at(3, 9, 30)).unwrap().len(), 1);
    }

    #[test]
    fn fresh_presence_prevents_alert() {
        let e = employee("e-1", VehicleClass::Ordinary);
        let (store, engine) = engine_for(vec![e.clone()]);
        report(&store, &e, at(2, 8, 50), true);

        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
    }

    #[test]
    fn stale_or_negative_presence_counts_as_absent() {
        let stale = employee("e-1", VehicleClass::Ordinary);
        let left = employee("e-2", VehicleClass::Ordinary);
        let (store, engine) = engine_for(vec![stale.clone(), left.clone()]);

        // Seen two hours before start
        report(&store, &stale, at(2, 7, 0), true);
        // Seen, then reported gone
        report(&store, &left, at(2, 8, 40), true);
        report(&store, &left, at(2, 8, 55), false);

        assert_eq!(engine.evaluate(at(2, 9, 1)).unwrap().len(), 2);
    }

    #[test]
    fn no_late_alert_outside_schedule() {
        let (_store, engine) = engine_for(vec![employee("e-1", VehicleClass::Ordinary)]);
        // Saturday
        assert!(engine.evaluate(at(7, 10, 0)).unwrap().is_empty());
        // After the working day
        assert!(engine.evaluate(at(2, 17, 30)).unwrap().is_empty());
    }

    #[test]
    fn approved_leave_skips_late_rule() {
        let mut e = employee("e-1", VehicleClass::Ordinary);
        e.leave.push(Leave {
            start: date(2),
            end: date(3),
            reason: None,
        });
        let (_store, engine) = engine_for(vec![e]);

        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
        assert_eq!(engine.evaluate(at(4, 9, 1)).unwrap().len(), 1);
    }

    #[test]
    fn state_vehicle_night_rule() {
        let e = employee("e-1", VehicleClass::State);
        let (store, engine) = engine_for(vec![e.clone()]);

        let night = engine.evaluate(at(2, 23, 0)).unwrap();
        assert_eq!(night.len(), 1);
        assert_eq!(night[0].kind, AlertKind::NightAbsentState);
        assert_eq!(night[0].window_date, date(2));

        // After midnight: same window, no new alert
        assert!(engine.evaluate(at(3, 2, 0)).unwrap().is_empty());
        assert!(store
            .alert_exists(&e.id, AlertKind::NightAbsentState, date(2))
            .unwrap());
    }

    #[test]
    fn state_vehicle_absent_in_daytime_no_alert() {
        let e = employee("e-1", VehicleClass::State);
        let (store, engine) = engine_for(vec![e.clone()]);
        report(&store, &e, at(2, 10, 55), false);

        // Monday, inside the working schedule but outside the night window
        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
        assert!(engine.evaluate(at(2, 11, 0)).unwrap().is_empty());
        // Saturday
        assert!(engine.evaluate(at(7, 11, 0)).unwrap().is_empty());
        assert!(store.list_alerts(None, 10).unwrap().is_empty());
    }

    #[test]
    fn night_rule_accepts_two_hour_old_sample() {
        let state = employee("e-1", VehicleClass::State);
        let ordinary = employee("e-2", VehicleClass::Ordinary);
        let (store, engine) = engine_for(vec![state.clone(), ordinary]);
        report(&store, &state, at(2, 21, 30), true);

        // 90 minutes old: fresh for the night rule
        assert!(engine.evaluate(at(2, 23, 0)).unwrap().is_empty());
        // 2h30 old: stale
        let alerts = engine.evaluate(at(3, 0, 0)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].window_date, date(2));
    }

    #[test]
    fn banned_employee_not_evaluated() {
        let e = employee("e-1", VehicleClass::Ordinary);
        let (store, engine) = engine_for(vec![e.clone()]);
        store
            .set_vehicle_authorized(&e.vehicles[0].id, &e.id, false, at(2, 8, 0))
            .unwrap();

        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
    }

    #[test]
    fn presence_failure_skips_only_this_cycle() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = AlertEngine::new(
            Arc::new(RosterRegistry::new(vec![employee("e-1", VehicleClass::Ordinary)])),
            Arc::new(FailingPresence),
            store.clone(),
            EnforcementPolicy::default(),
            MessageComposer::all_channels("HQ"),
        );

        assert!(engine.evaluate(at(2, 9, 1)).unwrap().is_empty());
        assert!(store.list_alerts(None, 10).unwrap().is_empty());
    }
}
