//! Validated configuration structures

use crate::schema::{
    RawConfig, RawEmailTransport, RawEmployee, RawNotifications, RawPolicy, RawRoles,
    RawServiceConfig, RawSmsTransport, RawTimeWindow,
};
use crate::validation::{parse_date, parse_days, parse_time};
use chrono::NaiveDate;
use parkwatch_api::{ClientRole, VehicleClass};
use parkwatch_util::{DaysOfWeek, EmployeeId, SpotId, TimeWindow, VehicleId, WallClock};
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub policy: EnforcementPolicy,
    pub notifications: NotificationConfig,
    pub employees: Vec<Employee>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            policy: EnforcementPolicy::from_raw(raw.policy),
            notifications: NotificationConfig::from_raw(raw.notifications),
            employees: raw.employees.into_iter().map(Employee::from_raw).collect(),
        }
    }

    /// Get employee by ID
    pub fn get_employee(&self, id: &EmployeeId) -> Option<&Employee> {
        self.employees.iter().find(|e| &e.id == id)
    }

    /// Owner of a vehicle
    pub fn employee_for_vehicle(&self, vehicle: &VehicleId) -> Option<&Employee> {
        self.employees
            .iter()
            .find(|e| e.vehicles.iter().any(|v| &v.id == vehicle))
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub evaluation_interval: Duration,
    pub roles: RoleMap,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(parkwatch_util::socket_path_without_env),
            data_dir: raw
                .data_dir
                .unwrap_or_else(parkwatch_util::data_dir_without_env),
            evaluation_interval: Duration::from_secs(raw.evaluation_interval_seconds.unwrap_or(60)),
            roles: RoleMap::from_raw(raw.roles),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// uid to role assignments for IPC clients
#[derive(Debug, Clone, Default)]
pub struct RoleMap {
    pub hr: Vec<u32>,
    pub intake: Vec<u32>,
    pub employee: Vec<u32>,
}

impl RoleMap {
    fn from_raw(raw: RawRoles) -> Self {
        Self {
            hr: raw.hr,
            intake: raw.intake,
            employee: raw.employee,
        }
    }

    /// Configured role for a uid; `None` means the caller decides (admin or guest)
    pub fn role_for_uid(&self, uid: u32) -> Option<ClientRole> {
        if self.hr.contains(&uid) {
            Some(ClientRole::Hr)
        } else if self.intake.contains(&uid) {
            Some(ClientRole::Intake)
        } else if self.employee.contains(&uid) {
            Some(ClientRole::Employee)
        } else {
            None
        }
    }
}

/// Alert and sanction parameters
#[derive(Debug, Clone)]
pub struct EnforcementPolicy {
    /// Tolerance after schedule start before absence is a violation
    pub grace: chrono::Duration,
    /// Length of every ban
    pub ban_duration: chrono::Duration,
    /// Freshness bound for presence samples, late rule
    pub presence_max_age: chrono::Duration,
    /// Freshness bound for presence samples, night rule
    pub night_presence_max_age: chrono::Duration,
    /// When state vehicles must be on site
    pub night_window: TimeWindow,
}

impl EnforcementPolicy {
    fn from_raw(raw: RawPolicy) -> Self {
        let defaults = Self::default();
        let night_window = raw
            .night_window
            .map(|range| {
                TimeWindow::new(
                    DaysOfWeek::ALL_DAYS,
                    convert_clock(&range.start, defaults.night_window.start),
                    convert_clock(&range.end, defaults.night_window.end),
                )
            })
            .unwrap_or(defaults.night_window);

        Self {
            grace: raw
                .grace_minutes
                .map(|m| chrono::Duration::minutes(m.into()))
                .unwrap_or(defaults.grace),
            ban_duration: raw
                .ban_days
                .map(|d| chrono::Duration::days(d.into()))
                .unwrap_or(defaults.ban_duration),
            presence_max_age: raw
                .presence_max_age_minutes
                .map(|m| chrono::Duration::minutes(m.into()))
                .unwrap_or(defaults.presence_max_age),
            night_presence_max_age: raw
                .night_presence_max_age_minutes
                .map(|m| chrono::Duration::minutes(m.into()))
                .unwrap_or(defaults.night_presence_max_age),
            night_window,
        }
    }
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::minutes(1),
            ban_duration: chrono::Duration::days(3),
            presence_max_age: chrono::Duration::minutes(30),
            night_presence_max_age: chrono::Duration::minutes(120),
            night_window: TimeWindow::new(
                DaysOfWeek::ALL_DAYS,
                WallClock { hour: 20, minute: 0 },
                WallClock { hour: 8, minute: 0 },
            ),
        }
    }
}

/// Notification dispatch settings
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub facility_name: String,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub backoff: Duration,
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
}

impl NotificationConfig {
    fn from_raw(raw: RawNotifications) -> Self {
        Self {
            facility_name: raw
                .facility_name
                .unwrap_or_else(|| "Parking".to_string()),
            max_attempts: raw.max_attempts.unwrap_or(3),
            backoff: Duration::from_secs(raw.backoff_seconds.unwrap_or(30)),
            email: raw.email.map(EmailConfig::from_raw),
            sms: raw.sms.map(SmsConfig::from_raw),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self::from_raw(RawNotifications::default())
    }
}

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl EmailConfig {
    fn from_raw(raw: RawEmailTransport) -> Self {
        Self {
            server: raw.server,
            port: raw.port.unwrap_or(587),
            username: raw.username,
            password: raw.password,
            from: raw.from,
        }
    }
}

/// SMS gateway settings
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: Option<String>,
}

impl SmsConfig {
    fn from_raw(raw: RawSmsTransport) -> Self {
        Self {
            endpoint: raw.endpoint,
            api_key: raw.api_key,
            sender: raw.sender,
        }
    }
}

/// Validated roster entry
#[derive(Debug, Clone)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub spot: SpotId,
    pub vehicle_class: VehicleClass,
    pub vehicles: Vec<Vehicle>,
    pub schedule: TimeWindow,
    pub leave: Vec<Leave>,
}

impl Employee {
    fn from_raw(raw: RawEmployee) -> Self {
        let leave = raw
            .leave
            .into_iter()
            .filter_map(|l| {
                Some(Leave {
                    start: parse_date(&l.start).ok()?,
                    end: parse_date(&l.end).ok()?,
                    reason: l.reason,
                })
            })
            .collect();

        Self {
            id: EmployeeId::new(raw.id),
            name: raw.name,
            email: raw.email.filter(|e| !e.is_empty()),
            phone: raw.phone.filter(|p| !p.is_empty()),
            spot: SpotId::new(raw.spot),
            vehicle_class: raw.vehicle_class,
            vehicles: raw
                .vehicles
                .into_iter()
                .map(|v| Vehicle {
                    id: VehicleId::new(v.id),
                    plate: v.plate,
                })
                .collect(),
            schedule: convert_time_window(raw.schedule),
            leave,
        }
    }

    /// Whether an approved absence covers `date`
    pub fn is_on_leave(&self, date: NaiveDate) -> bool {
        self.leave.iter().any(|l| l.covers(date))
    }

    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.vehicles.iter().map(|v| v.id.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vehicle {
    pub id: VehicleId,
    pub plate: Option<String>,
}

/// Approved absence, both ends inclusive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub reason: Option<String>,
}

impl Leave {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

// Conversion helpers

fn convert_time_window(raw: RawTimeWindow) -> TimeWindow {
    TimeWindow {
        days: parse_days(&raw.days).unwrap_or(DaysOfWeek::ALL_DAYS),
        start: convert_clock(&raw.start, WallClock { hour: 0, minute: 0 }),
        end: convert_clock(&raw.end, WallClock { hour: 23, minute: 59 }),
    }
}

fn convert_clock(value: &str, fallback: WallClock) -> WallClock {
    parse_time(value).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_config;

    #[test]
    fn policy_overrides() {
        let config = parse_config(
            r#"
            config_version = 1

            [service]
            evaluation_interval_seconds = 15

            [service.roles]
            hr = [1001]
            intake = [1002]

            [policy]
            grace_minutes = 5
            ban_days = 7

            [policy.night_window]
            start = "21:30"
            end = "06:00"
        "#,
        )
        .unwrap();

        assert_eq!(config.service.evaluation_interval, Duration::from_secs(15));
        assert_eq!(config.service.roles.role_for_uid(1001), Some(ClientRole::Hr));
        assert_eq!(config.service.roles.role_for_uid(1002), Some(ClientRole::Intake));
        assert_eq!(config.service.roles.role_for_uid(4242), None);

        assert_eq!(config.policy.grace, chrono::Duration::minutes(5));
        assert_eq!(config.policy.ban_duration, chrono::Duration::days(7));
        assert_eq!(config.policy.night_window.start.to_string(), "21:30");
        assert!(config.policy.night_window.crosses_midnight());
        assert_eq!(config.policy.presence_max_age, chrono::Duration::minutes(30));
    }

    #[test]
    fn leave_and_vehicle_lookup() {
        let config = parse_config(
            r#"
            config_version = 1

            [[employees]]
            id = "e-1"
            name = "One"
            email = ""
            spot = "A-1"

            [[employees.vehicles]]
            id = "v-1"

            [[employees.vehicles]]
            id = "v-2"

            [employees.schedule]
            days = "all"
            start = "09:00"
            end = "17:00"

            [[employees.leave]]
            start = "2026-03-02"
            end = "2026-03-04"
        "#,
        )
        .unwrap();

        let employee = &config.employees[0];
        assert!(employee.email.is_none());
        assert!(employee.is_on_leave(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        assert!(employee.is_on_leave(NaiveDate::from_ymd_opt(2026, 3, 4).unwrap()));
        assert!(!employee.is_on_leave(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()));

        let owner = config.employee_for_vehicle(&VehicleId::new("v-2")).unwrap();
        assert_eq!(owner.id.as_str(), "e-1");
        assert!(config.employee_for_vehicle(&VehicleId::new("v-9")).is_none());
    }
}
