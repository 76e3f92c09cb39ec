//! Shared utilities for parkwatch
//!
//! This crate provides:
//! - ID types (EmployeeId, VehicleId, SpotId, ComplaintId, ClientId)
//! - Wall-clock time, day masks and time windows (including windows that
//!   cross midnight)
//! - A mockable `now()` for exercising windows by hand
//! - Default paths for socket, config, and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
