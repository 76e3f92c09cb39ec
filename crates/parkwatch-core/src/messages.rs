//! Fixed notification messages

use parkwatch_api::{
    Ban, NewNotification, NotificationChannel, NotificationKind, NotificationPayload,
};
use parkwatch_config::{Employee, NotificationConfig};
use parkwatch_util::WindowOccurrence;

const DATE_TIME: &str = "%Y-%m-%d %H:%M";

/// Renders the four message kinds and fans each out to every enabled
/// channel the employee can be reached on
#[derive(Debug, Clone)]
pub struct MessageComposer {
    facility_name: String,
    email_enabled: bool,
    sms_enabled: bool,
}

impl MessageComposer {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            facility_name: config.facility_name.clone(),
            email_enabled: config.email.is_some(),
            sms_enabled: config.sms.is_some(),
        }
    }

    /// Composer with both channels enabled regardless of transport config
    pub fn all_channels(facility_name: impl Into<String>) -> Self {
        Self {
            facility_name: facility_name.into(),
            email_enabled: true,
            sms_enabled: true,
        }
    }

    /// Text stored on the alert itself
    pub fn late_absent_summary(employee: &Employee, occurrence: &WindowOccurrence) -> String {
        format!(
            "No vehicle at spot {} after scheduled start {}",
            employee.spot,
            occurrence.start.format(DATE_TIME)
        )
    }

    pub fn night_absent_summary(employee: &Employee, occurrence: &WindowOccurrence) -> String {
        format!(
            "State vehicle absent from spot {} during night window starting {}",
            employee.spot,
            occurrence.start.format(DATE_TIME)
        )
    }

    pub fn late_absent(
        &self,
        employee: &Employee,
        occurrence: &WindowOccurrence,
    ) -> Vec<NewNotification> {
        let subject = format!("[{}] Absence from your parking spot", self.facility_name);
        let email = format!(
            "Hello {},\n\nYour vehicle was not detected at spot {} after your scheduled start \
             time ({}).\n\nPlease contact HR if you are on approved leave.\n\n{}",
            employee.name,
            employee.spot,
            occurrence.start.format("%H:%M"),
            self.facility_name
        );
        let sms = format!(
            "{}: no vehicle at spot {} since {}.",
            self.facility_name,
            employee.spot,
            occurrence.start.format("%H:%M")
        );
        self.fan_out(employee, NotificationKind::LateAbsentAlert, subject, email, sms)
    }

    pub fn night_absent(
        &self,
        employee: &Employee,
        occurrence: &WindowOccurrence,
    ) -> Vec<NewNotification> {
        let subject = format!("[{}] State vehicle absent overnight", self.facility_name);
        let email = format!(
            "Hello {},\n\nThe state vehicle assigned to you must remain at spot {} between {} \
             and {}. It was not detected there.\n\n{}",
            employee.name,
            employee.spot,
            occurrence.start.format(DATE_TIME),
            occurrence.end.format(DATE_TIME),
            self.facility_name
        );
        let sms = format!(
            "{}: state vehicle absent from spot {} during the night window.",
            self.facility_name, employee.spot
        );
        self.fan_out(employee, NotificationKind::NightAbsentAlert, subject, email, sms)
    }

    pub fn warning(
        &self,
        employee: &Employee,
        ban_duration: chrono::Duration,
    ) -> Vec<NewNotification> {
        let days = ban_duration.num_days();
        let subject = format!("[{}] Parking warning", self.facility_name);
        let email = format!(
            "Hello {},\n\nA complaint has been recorded about your vehicle occupying a spot \
             that is not yours. This is a warning: another complaint will ban you from the \
             parking facility for {} day(s).\n\n{}",
            employee.name, days, self.facility_name
        );
        let sms = format!(
            "{}: parking warning. Next complaint means a {} day ban.",
            self.facility_name, days
        );
        self.fan_out(employee, NotificationKind::Warning, subject, email, sms)
    }

    pub fn ban(&self, employee: &Employee, ban: &Ban) -> Vec<NewNotification> {
        let subject = format!("[{}] Parking ban", self.facility_name);
        let email = format!(
            "Hello {},\n\nFollowing repeated complaints you are banned from the parking \
             facility from {} to {}. Your vehicle will be refused at the gate during this \
             period.\n\n{}",
            employee.name,
            ban.start.format(DATE_TIME),
            ban.end.format(DATE_TIME),
            self.facility_name
        );
        let sms = format!(
            "{}: parking ban from {} to {}.",
            self.facility_name,
            ban.start.format(DATE_TIME),
            ban.end.format(DATE_TIME)
        );
        self.fan_out(employee, NotificationKind::Ban, subject, email, sms)
    }

    fn fan_out(
        &self,
        employee: &Employee,
        kind: NotificationKind,
        subject: String,
        email_body: String,
        sms_body: String,
    ) -> Vec<NewNotification> {
        let mut jobs = Vec::with_capacity(2);

        if self.email_enabled
            && let Some(address) = &employee.email
        {
            jobs.push(NewNotification {
                employee_id: employee.id.clone(),
                recipient: address.clone(),
                channel: NotificationChannel::Email,
                kind,
                payload: NotificationPayload {
                    subject: subject.clone(),
                    body: email_body,
                },
            });
        }

        if self.sms_enabled
            && let Some(phone) = &employee.phone
        {
            jobs.push(NewNotification {
                employee_id: employee.id.clone(),
                recipient: phone.clone(),
                channel: NotificationChannel::Sms,
                kind,
                payload: NotificationPayload {
                    subject,
                    body: sms_body,
                },
            });
        }

        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use parkwatch_api::VehicleClass;
    use parkwatch_config::NotificationConfig;
    use parkwatch_util::{DaysOfWeek, EmployeeId, SpotId, TimeWindow, WallClock};

    fn employee(email: Option<&str>, phone: Option<&str>) -> Employee {
        Employee {
            id: EmployeeId::new("e-1"),
            name: "Amina".into(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            spot: SpotId::new("A-12"),
            vehicle_class: VehicleClass::Ordinary,
            vehicles: vec![],
            schedule: TimeWindow::new(
                DaysOfWeek::WEEKDAYS,
                WallClock::new(9, 0).unwrap(),
                WallClock::new(17, 0).unwrap(),
            ),
            leave: vec![],
        }
    }

    #[test]
    fn both_channels_when_reachable() {
        let composer = MessageComposer::all_channels("HQ");
        let start = Local.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let ban = Ban {
            start,
            end: start + chrono::Duration::days(3),
        };

        let jobs = composer.ban(&employee(Some("a@example.org"), Some("+2162")), &ban);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].channel, NotificationChannel::Email);
        assert_eq!(jobs[1].channel, NotificationChannel::Sms);
        assert!(jobs.iter().all(|j| j.kind == NotificationKind::Ban));
        assert!(jobs[1].payload.body.contains("2026-03-05 10:00"));
    }

    #[test]
    fn missing_contact_skips_channel() {
        let composer = MessageComposer::all_channels("HQ");
        let jobs = composer.warning(&employee(None, Some("+2162")), chrono::Duration::days(3));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].channel, NotificationChannel::Sms);
        assert!(jobs[0].payload.body.contains("3 day"));
    }

    #[test]
    fn unconfigured_transport_disables_channel() {
        // Default notification config has no transports
        let composer = MessageComposer::new(&NotificationConfig::default());
        let jobs = composer.warning(
            &employee(Some("a@example.org"), Some("+2162")),
            chrono::Duration::days(3),
        );
        assert!(jobs.is_empty());
    }
}
