//! Notification delivery for parkwatchd
//!
//! This crate provides:
//! - The [`Transport`] capability: deliver a rendered message or fail
//! - SMTP ([`EmailTransport`]) and HTTP gateway ([`SmsTransport`]) transports
//! - A scriptable [`MockTransport`] for tests
//! - The [`Dispatcher`], which drains the notification outbox with bounded
//!   retries and never blocks the caller that queued the job

mod dispatcher;
mod email;
mod mock;
mod sms;
mod transport;

pub use dispatcher::*;
pub use email::*;
pub use mock::*;
pub use sms::*;
pub use transport::*;
