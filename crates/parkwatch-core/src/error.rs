//! Core error type

use parkwatch_store::StoreError;
use parkwatch_util::{EmployeeId, VehicleId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown employee: {0}")]
    UnknownEmployee(EmployeeId),

    #[error("Schedule registry error: {0}")]
    Registry(String),

    #[error("Presence source error: {0}")]
    Presence(String),

    /// Authorization may only follow the sanction ledger
    #[error("Authorization of vehicle {vehicle_id} cannot be set directly")]
    InvalidTransition { vehicle_id: VehicleId },

    #[error("Sanction update for {employee_id} still conflicting after {attempts} attempts")]
    Conflict { employee_id: EmployeeId, attempts: u32 },
}

pub type CoreResult<T> = Result<T, CoreError>;
