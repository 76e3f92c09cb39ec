//! Read-only data sources consumed by the alert engine

use chrono::{DateTime, Local};
use parkwatch_api::PresenceSample;
use parkwatch_config::Employee;
use parkwatch_store::Store;
use parkwatch_util::{EmployeeId, SpotId, VehicleId};
use std::sync::Arc;

use crate::CoreResult;

/// Who is expected where and when. Immutable for the duration of an
/// evaluation cycle.
pub trait ScheduleRegistry: Send + Sync {
    fn employees(&self) -> CoreResult<Vec<Employee>>;

    fn employee(&self, id: &EmployeeId) -> CoreResult<Option<Employee>>;
}

/// Registry backed by the configured roster
pub struct RosterRegistry {
    employees: Vec<Employee>,
}

impl RosterRegistry {
    pub fn new(employees: Vec<Employee>) -> Self {
        Self { employees }
    }
}

impl ScheduleRegistry for RosterRegistry {
    fn employees(&self) -> CoreResult<Vec<Employee>> {
        Ok(self.employees.clone())
    }

    fn employee(&self, id: &EmployeeId) -> CoreResult<Option<Employee>> {
        Ok(self.employees.iter().find(|e| &e.id == id).cloned())
    }
}

/// Answers "was vehicle V at spot S?" as of a timestamp
pub trait PresenceSource: Send + Sync {
    /// Latest reading at or before `at`, if any
    fn sample(
        &self,
        vehicle_id: &VehicleId,
        spot_id: &SpotId,
        at: DateTime<Local>,
    ) -> CoreResult<Option<PresenceSample>>;
}

/// Presence source reading samples the feed reported into the store
pub struct StorePresence {
    store: Arc<dyn Store>,
}

impl StorePresence {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl PresenceSource for StorePresence {
    fn sample(
        &self,
        vehicle_id: &VehicleId,
        spot_id: &SpotId,
        at: DateTime<Local>,
    ) -> CoreResult<Option<PresenceSample>> {
        self.store
            .latest_presence(vehicle_id, spot_id, at)
            .map_err(|e| crate::CoreError::Presence(e.to_string()))
    }
}
