//! Notification dispatcher
//!
//! Drains the outbox written by the alert engine and the sanction ledger.
//! Each job is one channel for one recipient, so channels fail
//! independently. A failed attempt is persisted with its next retry time;
//! after `max_attempts` the job stays FAILED and is surfaced to operators.

use chrono::{DateTime, Local};
use parkwatch_api::{Event, EventPayload, JobStatus, NotificationChannel, NotificationJob};
use parkwatch_config::NotificationConfig;
use parkwatch_store::{AuditEvent, AuditEventType, Store};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{EmailTransport, SmsTransport, Transport, TransportError, TransportResult};

/// Jobs fetched per drain pass
const DRAIN_BATCH: usize = 100;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further one
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff,
        }
    }

    /// Delay before the next attempt once `attempts` have failed, or `None`
    /// when the job has used up its attempts
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let doublings = attempts.saturating_sub(1).min(16);
        Some(self.backoff.saturating_mul(1 << doublings))
    }
}

/// Delivers outbox jobs through per-channel transports
pub struct Dispatcher {
    store: Arc<dyn Store>,
    transports: HashMap<NotificationChannel, Arc<dyn Transport>>,
    retry: RetryPolicy,
    in_flight: Mutex<HashSet<i64>>,
    wake: Notify,
    events: broadcast::Sender<Event>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            transports: HashMap::new(),
            retry,
            in_flight: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            events,
        }
    }

    /// Build a dispatcher with a transport for every configured channel
    pub fn from_config(
        store: Arc<dyn Store>,
        config: &NotificationConfig,
    ) -> TransportResult<Self> {
        let mut dispatcher = Self::new(store, RetryPolicy::from_config(config));

        if let Some(email) = &config.email {
            dispatcher = dispatcher.with_transport(Arc::new(EmailTransport::new(email)?));
            info!(server = %email.server, port = email.port, "Email transport configured");
        }
        if let Some(sms) = &config.sms {
            dispatcher = dispatcher.with_transport(Arc::new(SmsTransport::new(sms)?));
            info!(endpoint = %sms.endpoint, "SMS transport configured");
        }
        if dispatcher.transports.is_empty() {
            warn!("No notification transport configured, messages will not be sent");
        }

        Ok(dispatcher)
    }

    /// Register (or replace) the transport for its channel
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(transport.channel(), transport);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Events for jobs that exhausted their attempts
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Ask the worker loop to drain now instead of at the next poll
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Make one delivery attempt and persist its outcome
    pub async fn send(&self, job: NotificationJob) -> JobStatus {
        let result = match self.transports.get(&job.channel) {
            Some(transport) => transport.deliver(&job.recipient, &job.payload).await,
            None => Err(TransportError::NoTransport(job.channel)),
        };
        let now = parkwatch_util::now();

        match result {
            Ok(()) => match self.store.mark_sent(job.id, now) {
                Ok(sent) => {
                    info!(
                        job_id = sent.id,
                        employee_id = %sent.employee_id,
                        channel = sent.channel.as_str(),
                        kind = sent.kind.as_str(),
                        attempts = sent.attempt_count,
                        "Notification sent"
                    );
                    JobStatus::Sent
                }
                Err(e) => {
                    error!(job_id = job.id, error = %e, "Delivered but failed to mark sent");
                    job.status
                }
            },
            Err(e) => self.record_failure(&job, &e, now),
        }
    }

    fn record_failure(
        &self,
        job: &NotificationJob,
        error: &TransportError,
        now: DateTime<Local>,
    ) -> JobStatus {
        let attempts = job.attempt_count + 1;
        let retry_at = self
            .retry
            .next_delay(attempts)
            .and_then(|delay| chrono::Duration::from_std(delay).ok())
            .map(|delay| now + delay);

        let failed = match self.store.mark_failed(job.id, &error.to_string(), retry_at) {
            Ok(failed) => failed,
            Err(e) => {
                error!(job_id = job.id, error = %e, "Failed to record delivery failure");
                return JobStatus::Failed;
            }
        };

        match retry_at {
            Some(retry_at) => {
                warn!(
                    job_id = failed.id,
                    channel = failed.channel.as_str(),
                    attempts,
                    retry_at = %retry_at,
                    error = %error,
                    "Notification delivery failed, will retry"
                );
            }
            None => {
                error!(
                    job_id = failed.id,
                    employee_id = %failed.employee_id,
                    channel = failed.channel.as_str(),
                    attempts,
                    error = %error,
                    "Notification delivery failed permanently"
                );
                let _ = self
                    .store
                    .append_audit(AuditEvent::new(AuditEventType::NotificationFailed {
                        job_id: failed.id,
                        channel: failed.channel,
                        error: error.to_string(),
                    }));
                // No subscribers is fine
                let _ = self
                    .events
                    .send(Event::new(EventPayload::NotificationFailed(failed)));
            }
        }

        JobStatus::Failed
    }

    /// Attempt every due job once, concurrently. Returns the number of
    /// attempts made.
    pub async fn drain(self: &Arc<Self>) -> usize {
        let now = parkwatch_util::now();
        let due = match self
            .store
            .due_notifications(now, self.retry.max_attempts, DRAIN_BATCH)
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to read notification outbox");
                return 0;
            }
        };

        let mut tasks = JoinSet::new();
        for job in due {
            if !self.claim(job.id) {
                continue;
            }
            let dispatcher = Arc::clone(self);
            tasks.spawn(async move {
                let id = job.id;
                let status = dispatcher.send(job).await;
                dispatcher.release(id);
                status
            });
        }

        let mut attempted = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(_) => attempted += 1,
                Err(e) => error!(error = %e, "Delivery task failed"),
            }
        }

        if attempted > 0 {
            debug!(attempted, "Outbox drained");
        }
        attempted
    }

    /// Worker loop: drain on every wake-up and every `poll_interval` until
    /// `shutdown` flips to true
    pub async fn run(
        self: Arc<Self>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(poll_interval_secs = poll_interval.as_secs(), "Dispatcher running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.drain().await;
        }

        info!("Dispatcher stopped");
    }

    fn claim(&self, id: i64) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id)
    }

    fn release(&self, id: i64) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}
