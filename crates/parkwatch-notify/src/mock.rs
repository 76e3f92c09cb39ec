//! Mock transport for testing

use async_trait::async_trait;
use parkwatch_api::{NotificationChannel, NotificationPayload};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Transport, TransportError, TransportResult};

/// A message the mock accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub recipient: String,
    pub payload: NotificationPayload,
}

/// Transport that records deliveries in memory and fails on request
pub struct MockTransport {
    channel: NotificationChannel,
    delivered: Arc<Mutex<Vec<Delivery>>>,
    attempts: Arc<Mutex<u32>>,

    /// Outcomes consumed one per attempt before falling back to `fail_all`
    pub scripted_failures: Arc<Mutex<VecDeque<String>>>,

    /// Fail every attempt with this reason
    pub fail_all: Arc<Mutex<Option<String>>>,

    /// Simulated network latency
    pub delay: Arc<Mutex<Option<Duration>>>,
}

impl MockTransport {
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            delivered: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(0)),
            scripted_failures: Arc::new(Mutex::new(VecDeque::new())),
            fail_all: Arc::new(Mutex::new(None)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Fail the next attempt with `reason`
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.scripted_failures.lock().unwrap().push_back(reason.into());
    }

    pub fn set_failing(&self, reason: Option<&str>) {
        *self.fail_all.lock().unwrap() = reason.map(String::from);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered.lock().unwrap().clone()
    }

    /// Number of delivery attempts, successful or not
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    async fn deliver(&self, recipient: &str, payload: &NotificationPayload) -> TransportResult<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        *self.attempts.lock().unwrap() += 1;

        let scripted = self.scripted_failures.lock().unwrap().pop_front();
        if let Some(reason) = scripted {
            return Err(TransportError::Unavailable(reason));
        }
        if let Some(reason) = self.fail_all.lock().unwrap().clone() {
            return Err(TransportError::Unavailable(reason));
        }

        self.delivered.lock().unwrap().push(Delivery {
            recipient: recipient.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
