//! SMTP transport

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use parkwatch_api::{NotificationChannel, NotificationPayload};
use parkwatch_config::EmailConfig;
use tracing::debug;

use crate::{Transport, TransportError, TransportResult};

/// Sends mail through an authenticated STARTTLS relay
pub struct EmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailTransport {
    pub fn new(config: &EmailConfig) -> TransportResult<Self> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| TransportError::Config(format!("from address {:?}: {}", config.from, e)))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| TransportError::Config(format!("smtp relay {}: {}", config.server, e)))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn deliver(&self, recipient: &str, payload: &NotificationPayload) -> TransportResult<()> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| TransportError::InvalidRecipient(format!("{}: {}", recipient, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(payload.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let response = self.mailer.send(message).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Rejected(e.to_string())
            } else {
                TransportError::Unavailable(e.to_string())
            }
        })?;

        debug!(
            recipient = %recipient,
            code = %response.code(),
            "Mail accepted by relay"
        );
        Ok(())
    }
}
