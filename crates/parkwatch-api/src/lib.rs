//! Shared types and IPC protocol for parkwatch
//!
//! This crate defines:
//! - Value types shared by every layer (alerts, complaints, sanction records,
//!   notification jobs, presence samples)
//! - Commands (requests from operator and intake clients)
//! - Responses
//! - Events (daemon -> subscribed clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
