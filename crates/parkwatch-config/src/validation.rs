//! Configuration validation

use crate::schema::{RawConfig, RawDays, RawEmployee, RawTimeWindow};
use chrono::{NaiveDate, NaiveTime, Weekday};
use parkwatch_util::{DaysOfWeek, WallClock};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Employee '{employee_id}': {message}")]
    EmployeeError { employee_id: String, message: String },

    #[error("Duplicate employee ID: {0}")]
    DuplicateEmployeeId(String),

    #[error("Vehicle '{0}' is assigned to more than one employee")]
    DuplicateVehicleId(String),

    #[error("Spot '{0}' is assigned to more than one employee")]
    DuplicateSpot(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Employee '{employee_id}': invalid schedule days: {message}")]
    InvalidDays { employee_id: String, message: String },

    #[error("Policy error: {0}")]
    PolicyError(String),

    #[error("Notification transport error: {0}")]
    TransportError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    let mut seen_vehicles = HashSet::new();
    let mut seen_spots = HashSet::new();
    for employee in &config.employees {
        if !seen_ids.insert(&employee.id) {
            errors.push(ValidationError::DuplicateEmployeeId(employee.id.clone()));
        }
        if !seen_spots.insert(&employee.spot) {
            errors.push(ValidationError::DuplicateSpot(employee.spot.clone()));
        }
        for vehicle in &employee.vehicles {
            if !seen_vehicles.insert(&vehicle.id) {
                errors.push(ValidationError::DuplicateVehicleId(vehicle.id.clone()));
            }
        }
    }

    for employee in &config.employees {
        errors.extend(validate_employee(employee));
    }

    errors.extend(validate_policy(config));
    errors.extend(validate_notifications(config));

    errors
}

fn validate_employee(employee: &RawEmployee) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let employee_error = |message: &str| ValidationError::EmployeeError {
        employee_id: employee.id.clone(),
        message: message.into(),
    };

    if employee.id.is_empty() {
        errors.push(employee_error("id cannot be empty"));
    }
    if employee.spot.is_empty() {
        errors.push(employee_error("spot cannot be empty"));
    }
    if employee.vehicles.is_empty() {
        errors.push(employee_error("at least one vehicle is required"));
    }
    if employee.vehicles.iter().any(|v| v.id.is_empty()) {
        errors.push(employee_error("vehicle id cannot be empty"));
    }

    errors.extend(validate_time_window(&employee.schedule, &employee.id));

    for leave in &employee.leave {
        match (parse_date(&leave.start), parse_date(&leave.end)) {
            (Ok(start), Ok(end)) => {
                if start > end {
                    errors.push(employee_error(&format!(
                        "leave starts after it ends ({} > {})",
                        leave.start, leave.end
                    )));
                }
            }
            (start, end) => {
                errors.extend(start.err());
                errors.extend(end.err());
            }
        }
    }

    errors
}

fn validate_time_window(window: &RawTimeWindow, employee_id: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match parse_days(&window.days) {
        Ok(days) if days.is_empty() => errors.push(ValidationError::EmployeeError {
            employee_id: employee_id.to_string(),
            message: "schedule applies to no day".into(),
        }),
        Ok(_) => {}
        Err(message) => errors.push(ValidationError::InvalidDays {
            employee_id: employee_id.to_string(),
            message,
        }),
    }

    for value in [&window.start, &window.end] {
        if let Err(message) = parse_time(value) {
            errors.push(ValidationError::InvalidTimeFormat {
                value: value.clone(),
                message,
            });
        }
    }

    errors
}

fn validate_policy(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let policy = &config.policy;

    if policy.ban_days == Some(0) {
        errors.push(ValidationError::PolicyError("ban_days must be at least 1".into()));
    }
    if policy.presence_max_age_minutes == Some(0)
        || policy.night_presence_max_age_minutes == Some(0)
    {
        errors.push(ValidationError::PolicyError(
            "presence max age must be at least 1 minute".into(),
        ));
    }
    if config.service.evaluation_interval_seconds == Some(0) {
        errors.push(ValidationError::PolicyError(
            "evaluation_interval_seconds must be at least 1".into(),
        ));
    }

    if let Some(window) = &policy.night_window {
        for value in [&window.start, &window.end] {
            if let Err(e) = parse_time(value) {
                errors.push(ValidationError::InvalidTimeFormat {
                    value: value.clone(),
                    message: e,
                });
            }
        }
        if window.start == window.end {
            errors.push(ValidationError::PolicyError(
                "night window start and end must differ".into(),
            ));
        }
    }

    errors
}

fn validate_notifications(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let notifications = &config.notifications;

    if notifications.max_attempts == Some(0) {
        errors.push(ValidationError::TransportError("max_attempts must be at least 1".into()));
    }

    if let Some(email) = &notifications.email {
        for (field, value) in [
            ("server", &email.server),
            ("username", &email.username),
            ("from", &email.from),
        ] {
            if value.is_empty() {
                errors.push(ValidationError::TransportError(format!(
                    "email.{} cannot be empty",
                    field
                )));
            }
        }
    }

    if let Some(sms) = &notifications.sms {
        if sms.endpoint.is_empty() {
            errors.push(ValidationError::TransportError("sms.endpoint cannot be empty".into()));
        }
        if sms.api_key.is_empty() {
            errors.push(ValidationError::TransportError("sms.api_key cannot be empty".into()));
        }
    }

    errors
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_time(s: &str) -> Result<WallClock, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map(WallClock::of_time)
        .map_err(|e| format!("expected HH:MM between 00:00 and 23:59 ({})", e))
}

/// Parse a YYYY-MM-DD date
pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        value: s.to_string(),
    })
}

/// Parse a schedule's days: a preset or a list of day names
pub fn parse_days(days: &RawDays) -> Result<DaysOfWeek, String> {
    match days {
        RawDays::Preset(preset) => match preset.to_lowercase().as_str() {
            "all" | "every" | "daily" => Ok(DaysOfWeek::ALL_DAYS),
            "weekdays" => Ok(DaysOfWeek::WEEKDAYS),
            "weekends" => Ok(DaysOfWeek::WEEKENDS),
            other => Err(format!("Unknown day preset: {}", other)),
        },
        RawDays::List(list) => list.iter().try_fold(DaysOfWeek::default(), |set, day| {
            day.parse::<Weekday>()
                .map(|weekday| set.with(weekday))
                .map_err(|_| format!("Unknown day: {}", day))
        }),
    }
}
