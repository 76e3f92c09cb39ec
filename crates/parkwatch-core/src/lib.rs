//! Core enforcement logic for parkwatchd
//!
//! This crate contains:
//! - Schedule Registry and Presence Source adapters
//! - The Alert Engine (late-arrival and state-vehicle night rules)
//! - The Sanction Ledger (complaint escalation, bans, ban expiry)
//! - The Vehicle Authorization Gate, writable only by the ledger
//! - Fixed notification message templates

mod alerts;
mod error;
mod gate;
mod ledger;
mod messages;
mod registry;

pub use alerts::*;
pub use error::*;
pub use gate::*;
pub use ledger::*;
pub use messages::*;
pub use registry::*;
