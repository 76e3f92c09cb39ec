//! Vehicle authorization gate

use chrono::{DateTime, Local};
use parkwatch_store::{AuditEvent, AuditEventType, Store};
use parkwatch_util::{EmployeeId, VehicleId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{CoreError, CoreResult};

/// Proof that a write comes from the sanction ledger. Only this crate can
/// construct one.
#[derive(Debug)]
pub struct LedgerToken(());

impl LedgerToken {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

/// Per-vehicle authorization flag. A pure, idempotent toggle with no policy
/// of its own; every write requires a [`LedgerToken`].
pub struct AuthorizationGate {
    store: Arc<dyn Store>,
}

impl AuthorizationGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Set the flag. Returns true if it changed.
    pub fn set_authorized(
        &self,
        _token: &LedgerToken,
        vehicle_id: &VehicleId,
        employee_id: &EmployeeId,
        authorized: bool,
        at: DateTime<Local>,
    ) -> CoreResult<bool> {
        let changed = self
            .store
            .set_vehicle_authorized(vehicle_id, employee_id, authorized, at)?;

        if changed {
            info!(
                vehicle_id = %vehicle_id,
                employee_id = %employee_id,
                authorized,
                "Vehicle authorization changed"
            );
            let _ = self
                .store
                .append_audit(AuditEvent::new(AuditEventType::AuthorizationChanged {
                    vehicle_id: vehicle_id.clone(),
                    authorized,
                }));
        }

        Ok(changed)
    }

    pub fn is_authorized(&self, vehicle_id: &VehicleId) -> CoreResult<bool> {
        Ok(self.store.is_vehicle_authorized(vehicle_id)?)
    }

    /// Refuse a write that does not come from the ledger. The attempt is
    /// audited and the flag left untouched.
    pub fn reject_direct_toggle(
        &self,
        vehicle_id: &VehicleId,
        requested: bool,
        client: &str,
    ) -> CoreError {
        warn!(
            vehicle_id = %vehicle_id,
            requested,
            client = %client,
            "Rejected direct authorization toggle"
        );
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::AuthorizationToggleRejected {
                vehicle_id: vehicle_id.clone(),
                requested,
                client_id: client.to_string(),
            }));

        CoreError::InvalidTransition {
            vehicle_id: vehicle_id.clone(),
        }
    }
}
