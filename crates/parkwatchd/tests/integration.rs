//! Integration tests for parkwatchd
//!
//! These tests drive the enforcement cycle, command handling and the
//! notification outbox end to end against a real SQLite store.

use chrono::{DateTime, Local, TimeZone};
use parkwatch_api::{
    AlertKind, ClientInfo, ClientRole, Command, Complaint, ErrorCode, ErrorInfo, EventPayload,
    JobStatus, NotificationChannel, PresenceSample, ResponsePayload, ResponseResult,
    SanctionOutcome, SanctionState,
};
use parkwatch_config::{parse_config, Config};
use parkwatch_ipc::{IpcClient, IpcServer};
use parkwatch_notify::{Dispatcher, MockTransport, RetryPolicy};
use parkwatch_store::{AlertLog, AuditEventType, AuditLog, NotificationOutbox, SqliteStore, Store};
use parkwatch_util::{ComplaintId, EmployeeId, SpotId, VehicleId};
use parkwatchd::{handle_command, handle_ipc_message, CommandOutcome, Enforcer};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const ROSTER: &str = r#"
config_version = 1

[policy]
grace_minutes = 1
ban_days = 3

[notifications]
facility_name = "HQ"
max_attempts = 2

[notifications.email]
server = "smtp.example.org"
username = "parking"
password = "secret"
from = "Parking <parking@example.org>"

[notifications.sms]
endpoint = "http://127.0.0.1:9/send"
api_key = "key"

[[employees]]
id = "e-100"
name = "Amina"
email = "amina@example.org"
phone = "+21620000001"
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
email = "karim@example.org"
phone = "+21620000002"
spot = "S-01"
vehicle_class = "state"

[[employees.vehicles]]
id = "v-200"

[employees.schedule]
days = "weekdays"
start = "08:00"
end = "16:00"
"#;

// 2026-03-02 is a Monday
fn at(d: u32, h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
}

fn config() -> Config {
    parse_config(ROSTER).unwrap()
}

fn enforcer() -> (Arc<SqliteStore>, Enforcer) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let enforcer = Enforcer::new(config(), store.clone());
    (store, enforcer)
}

fn client(role: ClientRole) -> ClientInfo {
    ClientInfo::new(role)
}

fn complaint(id: &str, employee: &str, at: DateTime<Local>) -> Command {
    Command::FileComplaint {
        complaint: Complaint {
            complaint_id: ComplaintId::new(id),
            employee_id: EmployeeId::new(employee),
            submitted_at: at,
            evidence_ref: Some("photo-17.jpg".into()),
            complainant_id: None,
            spot_id: Some(SpotId::new("B-03")),
        },
    }
}

fn presence(vehicle: &str, spot: &str, observed_at: DateTime<Local>) -> Command {
    Command::ReportPresence {
        sample: PresenceSample {
            vehicle_id: VehicleId::new(vehicle),
            spot_id: SpotId::new(spot),
            observed_at,
            present: true,
        },
    }
}

fn payload(outcome: CommandOutcome) -> ResponsePayload {
    match outcome.result {
        ResponseResult::Ok(payload) => payload,
        ResponseResult::Err(e) => panic!("unexpected error: {:?}", e),
    }
}

fn error_code(outcome: &CommandOutcome) -> Option<ErrorCode> {
    match &outcome.result {
        ResponseResult::Err(ErrorInfo { code, .. }) => Some(*code),
        ResponseResult::Ok(_) => None,
    }
}

fn mock_dispatcher(
    store: Arc<SqliteStore>,
    retry: RetryPolicy,
) -> (Arc<MockTransport>, Arc<MockTransport>, Arc<Dispatcher>) {
    let email = Arc::new(MockTransport::new(NotificationChannel::Email));
    let sms = Arc::new(MockTransport::new(NotificationChannel::Sms));
    let dispatcher = Dispatcher::new(store, retry)
        .with_transport(email.clone())
        .with_transport(sms.clone());
    (email, sms, Arc::new(dispatcher))
}

#[tokio::test]
async fn late_absence_is_alerted_once_on_both_channels() {
    let (store, enforcer) = enforcer();

    // Neither arrived; Karim drives a state vehicle, which owes night presence only
    let admin = client(ClientRole::Admin);
    let report = enforcer.run_cycle(at(2, 9, 1));
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].employee_id.as_str(), "e-100");
    assert_eq!(report.alerts[0].kind, AlertKind::LateAbsent);
    assert!(report.queued_notifications());
    assert!(matches!(report.events()[0].payload, EventPayload::AlertRaised(_)));

    // Periodic and manual triggers both see the alert as already recorded
    assert!(enforcer.run_cycle(at(2, 9, 2)).alerts.is_empty());
    let manual = handle_command(&enforcer, &admin, Command::CheckAlertsNow, at(2, 9, 3));
    match payload(manual) {
        ResponsePayload::AlertsChecked { created, .. } => assert!(created.is_empty()),
        other => panic!("unexpected payload: {:?}", other),
    }

    let (email, sms, dispatcher) = mock_dispatcher(store.clone(), dispatcher_retry());
    assert_eq!(dispatcher.drain().await, 2);
    assert_eq!(email.deliveries()[0].recipient, "amina@example.org");
    assert_eq!(sms.deliveries()[0].recipient, "+21620000001");
    assert_eq!(store.count_notifications(JobStatus::Sent).unwrap(), 2);
}

#[test]
fn state_vehicle_is_only_held_to_the_night_rule() {
    let (store, enforcer) = enforcer();

    // Monday, inside Karim's working schedule
    let report = enforcer.run_cycle(at(2, 11, 0));
    assert!(report.alerts.iter().all(|a| a.employee_id.as_str() != "e-200"));

    let report = enforcer.run_cycle(at(2, 23, 0));
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].employee_id.as_str(), "e-200");
    assert_eq!(report.alerts[0].kind, AlertKind::NightAbsentState);

    let karim = EmployeeId::new("e-200");
    let kinds: Vec<AlertKind> = store
        .list_alerts(Some(&karim), 10)
        .unwrap()
        .iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(kinds, vec![AlertKind::NightAbsentState]);
}

#[test]
fn periodic_and_manual_checks_racing_raise_one_alert() {
    let (store, enforcer) = enforcer();
    let admin = client(ClientRole::Admin);

    // Monday to Friday, one race per working day
    for day in 2..=6 {
        let now = at(day, 9, 1);
        let start = Barrier::new(2);

        let (periodic, manual) = std::thread::scope(|scope| {
            let periodic = scope.spawn(|| {
                start.wait();
                enforcer.run_cycle(now).alerts.len()
            });
            let manual = scope.spawn(|| {
                start.wait();
                match payload(handle_command(&enforcer, &admin, Command::CheckAlertsNow, now)) {
                    ResponsePayload::AlertsChecked { created, .. } => created.len(),
                    other => panic!("unexpected payload: {:?}", other),
                }
            });
            (periodic.join().unwrap(), manual.join().unwrap())
        });
        assert_eq!(periodic + manual, 1, "day {}", day);
    }

    let alerts = store.list_alerts(None, 20).unwrap();
    assert_eq!(alerts.len(), 5);
    assert!(alerts.iter().all(|a| a.kind == AlertKind::LateAbsent));
    assert_eq!(store.count_notifications(JobStatus::Pending).unwrap(), 10);
}

fn dispatcher_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        backoff: Duration::ZERO,
    }
}

#[test]
fn complaint_escalation_ban_and_expiry() {
    let (_store, enforcer) = enforcer();
    let intake = client(ClientRole::Intake);
    let hr = client(ClientRole::Hr);

    // First complaint: warning
    let now = at(2, 10, 0);
    let first = handle_command(&enforcer, &intake, complaint("c-1", "e-100", now), now);
    assert!(first.queued_notifications);
    assert_eq!(first.events.len(), 1);
    assert!(matches!(
        payload(first),
        ResponsePayload::ComplaintRecorded(SanctionOutcome::Warned { .. })
    ));

    // Redelivered by the intake service: ignored
    let now = at(2, 10, 1);
    let again = handle_command(&enforcer, &intake, complaint("c-1", "e-100", now), now);
    assert!(again.events.is_empty());
    assert!(!again.queued_notifications);
    assert!(matches!(
        payload(again),
        ResponsePayload::ComplaintRecorded(SanctionOutcome::Duplicate { .. })
    ));

    // Second complaint: ban
    let now = at(2, 10, 5);
    let second = handle_command(&enforcer, &intake, complaint("c-2", "e-100", now), now);
    let ban = match payload(second) {
        ResponsePayload::ComplaintRecorded(SanctionOutcome::Banned { ban, record }) => {
            assert_eq!(record.complaint_count, 2);
            ban
        }
        other => panic!("unexpected payload: {:?}", other),
    };
    assert_eq!(ban.end, at(5, 10, 5));

    // The gate now refuses the vehicle
    let now = at(3, 8, 50);
    match payload(handle_command(&enforcer, &intake, presence("v-100", "A-12", now), now)) {
        ResponsePayload::PresenceRecorded { authorized } => assert!(!authorized),
        other => panic!("unexpected payload: {:?}", other),
    }

    // Banned employees are not chased for absence
    assert!(enforcer
        .run_cycle(at(3, 9, 30))
        .alerts
        .iter()
        .all(|a| a.employee_id.as_str() != "e-100"));

    // Ban ends: vehicle reauthorized, count kept
    let report = enforcer.run_cycle(at(5, 10, 5));
    assert_eq!(report.expired, vec![EmployeeId::new("e-100")]);
    assert!(report
        .events()
        .iter()
        .any(|e| matches!(e.payload, EventPayload::BanExpired { .. })));

    let now = at(5, 10, 6);
    match payload(handle_command(&enforcer, &intake, presence("v-100", "A-12", now), now)) {
        ResponsePayload::PresenceRecorded { authorized } => assert!(authorized),
        other => panic!("unexpected payload: {:?}", other),
    }
    match payload(handle_command(
        &enforcer,
        &hr,
        Command::GetSanction {
            employee_id: EmployeeId::new("e-100"),
        },
        at(5, 10, 6),
    )) {
        ResponsePayload::Sanction(record) => {
            assert_eq!(record.complaint_count, 2);
            assert_eq!(record.state(), SanctionState::Warned);
            assert!(record.active_ban.is_none());
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[test]
fn complaint_against_unknown_employee() {
    let (_store, enforcer) = enforcer();
    let outcome = handle_command(
        &enforcer,
        &client(ClientRole::Intake),
        complaint("c-9", "e-999", at(2, 10, 0)),
        at(2, 10, 0),
    );
    assert_eq!(error_code(&outcome), Some(ErrorCode::UnknownEmployee));
}

#[test]
fn roles_checked_before_core_is_touched() {
    let (store, enforcer) = enforcer();
    let now = at(2, 9, 30);
    let guest = client(ClientRole::Guest);
    let employee = client(ClientRole::Employee);
    let intake = client(ClientRole::Intake);

    let denied = handle_command(&enforcer, &guest, Command::CheckAlertsNow, now);
    assert_eq!(error_code(&denied), Some(ErrorCode::PermissionDenied));
    assert!(store.list_notifications(None, 10).unwrap().is_empty());

    let denied = handle_command(&enforcer, &guest, complaint("c-1", "e-100", now), now);
    assert_eq!(error_code(&denied), Some(ErrorCode::PermissionDenied));

    let denied = handle_command(
        &enforcer,
        &employee,
        Command::ListAlerts {
            employee_id: None,
            limit: 10,
        },
        now,
    );
    assert_eq!(error_code(&denied), Some(ErrorCode::PermissionDenied));

    let denied = handle_command(&enforcer, &employee, presence("v-100", "A-12", now), now);
    assert_eq!(error_code(&denied), Some(ErrorCode::PermissionDenied));

    let denied = handle_command(&enforcer, &intake, Command::RetryNotification { job_id: 1 }, now);
    assert_eq!(error_code(&denied), Some(ErrorCode::PermissionDenied));

    // Anyone may file a complaint but a guest, and anyone may ping
    let filed = handle_command(&enforcer, &employee, complaint("c-1", "e-100", now), now);
    assert!(error_code(&filed).is_none());
    assert!(matches!(
        payload(handle_command(&enforcer, &guest, Command::Ping, now)),
        ResponsePayload::Pong
    ));
}

#[test]
fn direct_authorization_toggle_is_rejected() {
    let (store, enforcer) = enforcer();
    let admin = client(ClientRole::Admin);
    let now = at(2, 12, 0);

    let outcome = handle_command(
        &enforcer,
        &admin,
        Command::SetVehicleAuthorization {
            vehicle_id: VehicleId::new("v-100"),
            authorized: false,
        },
        now,
    );
    assert_eq!(error_code(&outcome), Some(ErrorCode::InvalidTransition));

    match payload(handle_command(&enforcer, &admin, presence("v-100", "A-12", now), now)) {
        ResponsePayload::PresenceRecorded { authorized } => assert!(authorized),
        other => panic!("unexpected payload: {:?}", other),
    }

    let audits = store.get_recent_audits(10).unwrap();
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::AuthorizationToggleRejected { .. })));
}

#[tokio::test]
async fn failed_notification_can_be_retried_once() {
    let (store, enforcer) = enforcer();
    let admin = client(ClientRole::Admin);
    assert_eq!(enforcer.run_cycle(at(2, 9, 1)).alerts.len(), 1);

    let (_email, sms, dispatcher) = mock_dispatcher(store.clone(), dispatcher_retry());
    sms.set_failing(Some("gateway down"));
    dispatcher.drain().await;
    dispatcher.drain().await;
    assert_eq!(sms.attempts(), 2);

    let failed = store.list_notifications(Some(JobStatus::Failed), 10).unwrap();
    assert_eq!(failed.len(), 1);
    let failed_id = failed[0].id;
    let sent_id = store.list_notifications(Some(JobStatus::Sent), 10).unwrap()[0].id;

    // Only failed jobs can be requeued
    let now = at(2, 9, 30);
    let retry = |job_id| Command::RetryNotification { job_id };
    let outcome = handle_command(&enforcer, &admin, retry(sent_id), now);
    assert_eq!(error_code(&outcome), Some(ErrorCode::InvalidRequest));
    let outcome = handle_command(&enforcer, &admin, retry(9999), now);
    assert_eq!(error_code(&outcome), Some(ErrorCode::NotFound));

    sms.set_failing(None);
    let outcome = handle_command(&enforcer, &admin, retry(failed_id), now);
    assert!(outcome.queued_notifications);
    assert_eq!(dispatcher.drain().await, 1);
    assert_eq!(
        store.get_notification(failed_id).unwrap().unwrap().status,
        JobStatus::Sent
    );

    match payload(handle_command(&enforcer, &admin, Command::GetHealth, at(2, 9, 31))) {
        ResponsePayload::Health(health) => {
            assert!(health.store_ok);
            assert_eq!(health.employee_count, 2);
            assert_eq!(health.pending_notifications, 0);
            assert_eq!(health.failed_notifications, 0);
        }
        other => panic!("unexpected payload: {:?}", other),
    }
}

#[tokio::test]
async fn queued_notifications_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("parkwatchd.db");

    {
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let enforcer = Enforcer::new(config(), store.clone());
        // Amina late in the morning, Karim's state vehicle away overnight
        assert_eq!(enforcer.run_cycle(at(2, 9, 1)).alerts.len(), 1);
        assert_eq!(enforcer.run_cycle(at(2, 23, 0)).alerts.len(), 1);
    }

    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    assert_eq!(store.count_notifications(JobStatus::Pending).unwrap(), 4);

    let (email, sms, dispatcher) = mock_dispatcher(store.clone(), dispatcher_retry());
    assert_eq!(dispatcher.drain().await, 4);
    assert_eq!(email.deliveries().len(), 2);
    assert_eq!(sms.deliveries().len(), 2);

    // Alerts are not raised again after the restart
    let enforcer = Enforcer::new(config(), store.clone() as Arc<dyn Store>);
    assert!(enforcer.run_cycle(at(2, 9, 5)).alerts.is_empty());
    assert!(enforcer.run_cycle(at(3, 1, 0)).alerts.is_empty());
}

#[tokio::test]
async fn commands_over_the_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("parkwatchd.sock");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let enforcer = Arc::new(Enforcer::new(config(), store.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store, dispatcher_retry()));

    let mut server = IpcServer::new(&socket_path, Default::default());
    server.start().await.unwrap();
    let server = Arc::new(server);
    let mut messages = server.take_message_receiver().await.unwrap();

    let accept = server.clone();
    tokio::spawn(async move {
        let _ = accept.run().await;
    });
    let router = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            handle_ipc_message(&enforcer, &router, &dispatcher, msg).await;
        }
    });

    let mut ipc = IpcClient::connect(&socket_path).await.unwrap();
    let pong = tokio::time::timeout(Duration::from_secs(5), ipc.call(Command::Ping))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(pong, ResponsePayload::Pong));

    // Same uid as the daemon: admin
    match ipc.call(Command::GetHealth).await.unwrap() {
        ResponsePayload::Health(health) => assert_eq!(health.employee_count, 2),
        other => panic!("unexpected payload: {:?}", other),
    }

    let rejected = ipc
        .call(Command::SetVehicleAuthorization {
            vehicle_id: VehicleId::new("v-100"),
            authorized: false,
        })
        .await;
    assert!(matches!(
        rejected,
        Err(parkwatch_ipc::IpcError::Rejected(ErrorInfo {
            code: ErrorCode::InvalidTransition,
            ..
        }))
    ));
}

#[test]
fn health_reports_unreadable_outbox_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("parkwatchd.db");
    let store = Arc::new(SqliteStore::open(&db_path).unwrap());
    let enforcer = Enforcer::new(config(), store.clone());
    let admin = client(ClientRole::Admin);

    let raw = rusqlite::Connection::open(&db_path).unwrap();
    raw.execute_batch("DROP TABLE notification_jobs").unwrap();
    drop(raw);

    let outcome = handle_command(&enforcer, &admin, Command::GetHealth, at(2, 9, 0));
    assert_eq!(error_code(&outcome), Some(ErrorCode::StoreError));
}
