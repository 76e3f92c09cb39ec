//! parkwatchd service internals
//!
//! Wires the core components to a store and exposes:
//! - [`Enforcer`]: one evaluation cycle (alerts, ban expiry, gate
//!   reconciliation, presence pruning) guarded against overlap
//! - [`handle_command`]: role-checked execution of IPC commands
//! - [`handle_ipc_message`]: the async glue between the IPC server, the
//!   enforcer and the notification dispatcher

mod handlers;
mod service;

pub use handlers::*;
pub use service::*;
