//! IPC command handling

use chrono::{DateTime, Local};
use parkwatch_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus,
    JobStatus, Response, ResponsePayload, ResponseResult, SanctionOutcome,
};
use parkwatch_core::CoreError;
use parkwatch_ipc::{IpcServer, ServerMessage};
use parkwatch_notify::Dispatcher;
use parkwatch_store::{AuditEvent, AuditEventType};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::Enforcer;

/// Result of one command plus its side effects for the async layer
#[derive(Debug)]
pub struct CommandOutcome {
    pub result: ResponseResult,
    /// Broadcast to subscribed clients
    pub events: Vec<Event>,
    /// New or requeued notification jobs; the dispatcher should wake up
    pub queued_notifications: bool,
}

impl CommandOutcome {
    fn ok(payload: ResponsePayload) -> Self {
        Self {
            result: ResponseResult::Ok(payload),
            events: Vec::new(),
            queued_notifications: false,
        }
    }

    fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result: ResponseResult::Err(ErrorInfo::new(code, message)),
            events: Vec::new(),
            queued_notifications: false,
        }
    }

    fn denied(role: ClientRole) -> Self {
        Self::err(
            ErrorCode::PermissionDenied,
            format!("Role {:?} may not run this command", role),
        )
    }

    fn with_events(mut self, events: Vec<Event>, queued: bool) -> Self {
        self.events = events;
        self.queued_notifications = queued;
        self
    }
}

impl From<CoreError> for CommandOutcome {
    fn from(e: CoreError) -> Self {
        let code = match &e {
            CoreError::UnknownEmployee(_) => ErrorCode::UnknownEmployee,
            CoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            CoreError::Store(_) | CoreError::Conflict { .. } => ErrorCode::StoreError,
            CoreError::Registry(_) | CoreError::Presence(_) => ErrorCode::InternalError,
        };
        CommandOutcome::err(code, e.to_string())
    }
}

/// Execute one command on behalf of `client`. Blocking: call from the
/// blocking pool.
pub fn handle_command(
    enforcer: &Enforcer,
    client: &ClientInfo,
    command: Command,
    now: DateTime<Local>,
) -> CommandOutcome {
    let role = client.role;
    let store = enforcer.store();

    match command {
        Command::CheckAlertsNow => {
            if !role.can_trigger_checks() {
                return CommandOutcome::denied(role);
            }
            match enforcer.alerts().evaluate(now) {
                Ok(created) => {
                    info!(
                        client_id = %client.client_id,
                        created = created.len(),
                        "Manual alert check"
                    );
                    let events = created
                        .iter()
                        .map(|a| Event::new(EventPayload::AlertRaised(a.clone())))
                        .collect();
                    let queued = !created.is_empty();
                    CommandOutcome::ok(ResponsePayload::AlertsChecked {
                        checked_at: now,
                        created,
                    })
                    .with_events(events, queued)
                }
                Err(e) => e.into(),
            }
        }

        Command::ExpireBansNow => {
            if !role.can_trigger_checks() {
                return CommandOutcome::denied(role);
            }
            match enforcer.ledger().expire_bans(now) {
                Ok(employees) => {
                    let events = employees
                        .iter()
                        .map(|id| {
                            Event::new(EventPayload::BanExpired {
                                employee_id: id.clone(),
                            })
                        })
                        .collect();
                    CommandOutcome::ok(ResponsePayload::BansExpired { employees })
                        .with_events(events, false)
                }
                Err(e) => e.into(),
            }
        }

        Command::FileComplaint { complaint } => {
            if !role.can_file_complaints() {
                return CommandOutcome::denied(role);
            }
            match enforcer.ledger().accept_complaint(&complaint, now) {
                Ok(outcome) => {
                    let changed = !matches!(outcome, SanctionOutcome::Duplicate { .. });
                    let queued = matches!(
                        outcome,
                        SanctionOutcome::Warned { .. } | SanctionOutcome::Banned { .. }
                    );
                    let events = if changed {
                        vec![Event::new(EventPayload::SanctionChanged {
                            employee_id: complaint.employee_id.clone(),
                            outcome: outcome.clone(),
                        })]
                    } else {
                        Vec::new()
                    };
                    CommandOutcome::ok(ResponsePayload::ComplaintRecorded(outcome))
                        .with_events(events, queued)
                }
                Err(e) => e.into(),
            }
        }

        Command::ReportPresence { sample } => {
            if !role.can_report_presence() {
                return CommandOutcome::denied(role);
            }
            if enforcer.config().employee_for_vehicle(&sample.vehicle_id).is_none() {
                debug!(vehicle_id = %sample.vehicle_id, "Presence for unregistered vehicle");
                return CommandOutcome::ok(ResponsePayload::PresenceRecorded { authorized: false });
            }
            if let Err(e) = store.record_presence(&sample) {
                return CoreError::from(e).into();
            }
            match enforcer.ledger().gate().is_authorized(&sample.vehicle_id) {
                Ok(authorized) => {
                    if !authorized && sample.present {
                        warn!(
                            vehicle_id = %sample.vehicle_id,
                            spot_id = %sample.spot_id,
                            "Banned vehicle detected"
                        );
                    }
                    CommandOutcome::ok(ResponsePayload::PresenceRecorded { authorized })
                }
                Err(e) => e.into(),
            }
        }

        Command::ListAlerts { employee_id, limit } => {
            if !role.can_review() {
                return CommandOutcome::denied(role);
            }
            match store.list_alerts(employee_id.as_ref(), limit) {
                Ok(alerts) => CommandOutcome::ok(ResponsePayload::Alerts(alerts)),
                Err(e) => CoreError::from(e).into(),
            }
        }

        Command::GetSanction { employee_id } => {
            if !role.can_review() {
                return CommandOutcome::denied(role);
            }
            if enforcer.config().get_employee(&employee_id).is_none() {
                return CoreError::UnknownEmployee(employee_id).into();
            }
            match enforcer.ledger().sanction(&employee_id) {
                Ok(record) => CommandOutcome::ok(ResponsePayload::Sanction(record)),
                Err(e) => e.into(),
            }
        }

        Command::ListNotifications { status, limit } => {
            if !role.can_review() {
                return CommandOutcome::denied(role);
            }
            match store.list_notifications(status, limit) {
                Ok(jobs) => CommandOutcome::ok(ResponsePayload::Notifications(jobs)),
                Err(e) => CoreError::from(e).into(),
            }
        }

        Command::RetryNotification { job_id } => {
            if !role.can_manage_notifications() {
                return CommandOutcome::denied(role);
            }
            match store.requeue_notification(job_id) {
                Ok(true) => {
                    info!(job_id, client_id = %client.client_id, "Notification requeued");
                    CommandOutcome::ok(ResponsePayload::NotificationRequeued { job_id })
                        .with_events(Vec::new(), true)
                }
                Ok(false) => match store.get_notification(job_id) {
                    Ok(Some(job)) => CommandOutcome::err(
                        ErrorCode::InvalidRequest,
                        format!(
                            "Job {} is {}, only failed jobs can be retried",
                            job_id,
                            job.status.as_str()
                        ),
                    ),
                    Ok(None) => CommandOutcome::err(
                        ErrorCode::NotFound,
                        format!("No notification job {}", job_id),
                    ),
                    Err(e) => CoreError::from(e).into(),
                },
                Err(e) => CoreError::from(e).into(),
            }
        }

        Command::SetVehicleAuthorization {
            vehicle_id,
            authorized,
        } => enforcer
            .ledger()
            .gate()
            .reject_direct_toggle(&vehicle_id, authorized, &client.client_id.to_string())
            .into(),

        Command::SubscribeEvents => {
            if !role.can_review() {
                return CommandOutcome::denied(role);
            }
            CommandOutcome::ok(ResponsePayload::Subscribed {
                client_id: client.client_id.clone(),
            })
        }

        Command::UnsubscribeEvents => CommandOutcome::ok(ResponsePayload::Unsubscribed),

        Command::GetHealth => {
            let counts = store.count_notifications(JobStatus::Pending).and_then(|pending| {
                Ok((pending, store.count_notifications(JobStatus::Failed)?))
            });
            match counts {
                Ok((pending, failed)) => CommandOutcome::ok(ResponsePayload::Health(HealthStatus {
                    live: true,
                    store_ok: store.is_healthy(),
                    employee_count: enforcer.config().employees.len(),
                    pending_notifications: pending,
                    failed_notifications: failed,
                })),
                Err(e) => {
                    warn!(error = %e, "Health check could not read the notification outbox");
                    CoreError::from(e).into()
                }
            }
        }

        Command::Ping => CommandOutcome::ok(ResponsePayload::Pong),
    }
}

/// Route one message from the IPC server. Commands run on the blocking pool
/// so a slow store never stalls the event loop.
pub async fn handle_ipc_message(
    enforcer: &Arc<Enforcer>,
    ipc: &Arc<IpcServer>,
    dispatcher: &Arc<Dispatcher>,
    msg: ServerMessage,
) {
    match msg {
        ServerMessage::Request {
            client_id,
            info,
            request,
        } => {
            let request_id = request.request_id;
            let worker = enforcer.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                handle_command(&worker, &info, request.command, parkwatch_util::now())
            })
            .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(client_id = %client_id, error = %e, "Command handler failed");
                    CommandOutcome::err(ErrorCode::InternalError, "Command handler failed")
                }
            };

            let response = Response {
                request_id,
                api_version: parkwatch_api::API_VERSION,
                result: outcome.result,
            };
            if let Err(e) = ipc.send_response(&client_id, response).await {
                debug!(client_id = %client_id, error = %e, "Client gone before response");
            }

            for event in outcome.events {
                ipc.broadcast_event(event);
            }
            if outcome.queued_notifications {
                dispatcher.wake();
            }
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                "Client connected"
            );

            let _ = enforcer
                .store()
                .append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    client_id: client_id.to_string(),
                    role: format!("{:?}", info.role),
                    uid: info.uid,
                }));
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");

            let _ = enforcer
                .store()
                .append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                    client_id: client_id.to_string(),
                }));
        }
    }
}
