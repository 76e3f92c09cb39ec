//! parkwatchctl - operator command line for parkwatchd
//!
//! Talks to the daemon over its Unix socket. The daemon decides what each
//! caller may do from the socket peer's uid, so most commands need to run
//! as the service user or an account listed in the role map.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parkwatch_api::{
    AlertEvent, Command, Complaint, EventPayload, JobStatus, NotificationJob, ResponsePayload,
    SanctionOutcome, SanctionRecord,
};
use parkwatch_ipc::IpcClient;
use parkwatch_util::{default_socket_path, ComplaintId, EmployeeId, SpotId};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parkwatchctl")]
#[command(about = "Inspect and drive the parkwatchd service", long_about = None)]
struct Cli {
    /// Socket path (or set PARKWATCH_SOCKET env var)
    #[arg(short, long, env = "PARKWATCH_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print raw JSON responses instead of a summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate attendance now and raise any due alerts
    CheckAlerts,

    /// Lift every ban that has run out
    ExpireBans,

    /// File a complaint against an employee
    Complain {
        /// Employee the complaint is against
        employee: String,
        /// Complaint id from the intake system (generated when omitted)
        #[arg(long)]
        complaint_id: Option<String>,
        /// Reference to the uploaded evidence
        #[arg(long)]
        evidence: Option<String>,
        /// Spot that was occupied
        #[arg(long)]
        spot: Option<String>,
        /// Employee who filed the complaint
        #[arg(long)]
        complainant: Option<String>,
    },

    /// List recorded alerts, newest first
    Alerts {
        /// Only alerts for this employee
        #[arg(long)]
        employee: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show an employee's sanction record
    Sanction {
        employee: String,
    },

    /// List notification jobs, newest first
    Notifications {
        /// pending, sent or failed
        #[arg(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Give a failed notification one more delivery attempt
    Retry {
        job_id: i64,
    },

    /// Show daemon health
    Health,

    /// Check that the daemon answers
    Ping,

    /// Print events as they happen until interrupted
    Watch,
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::parse(s).ok_or_else(|| format!("unknown status '{}' (pending, sent, failed)", s))
}

impl Commands {
    fn into_command(self) -> Command {
        match self {
            Commands::CheckAlerts => Command::CheckAlertsNow,
            Commands::ExpireBans => Command::ExpireBansNow,
            Commands::Complain {
                employee,
                complaint_id,
                evidence,
                spot,
                complainant,
            } => Command::FileComplaint {
                complaint: Complaint {
                    complaint_id: complaint_id
                        .map(ComplaintId::new)
                        .unwrap_or_else(ComplaintId::generate),
                    employee_id: EmployeeId::new(employee),
                    submitted_at: parkwatch_util::now(),
                    evidence_ref: evidence,
                    complainant_id: complainant.map(EmployeeId::new),
                    spot_id: spot.map(SpotId::new),
                },
            },
            Commands::Alerts { employee, limit } => Command::ListAlerts {
                employee_id: employee.map(EmployeeId::new),
                limit,
            },
            Commands::Sanction { employee } => Command::GetSanction {
                employee_id: EmployeeId::new(employee),
            },
            Commands::Notifications { status, limit } => {
                Command::ListNotifications { status, limit }
            }
            Commands::Retry { job_id } => Command::RetryNotification { job_id },
            Commands::Health => Command::GetHealth,
            Commands::Ping => Command::Ping,
            Commands::Watch => Command::SubscribeEvents,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to parkwatchd at {:?}", cli.socket))?;
    debug!(socket = %cli.socket.display(), "Connected");

    if matches!(cli.command, Commands::Watch) {
        return watch(client, cli.json).await;
    }

    let mut client = client;
    let payload = client.call(cli.command.into_command()).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_payload(&payload);
    }
    Ok(())
}

async fn watch(client: IpcClient, json: bool) -> Result<()> {
    let mut events = client.subscribe().await?;
    eprintln!("Watching events, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.next() => {
                let event = event?;
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                    continue;
                }
                let at = event.timestamp.format("%Y-%m-%d %H:%M:%S");
                match event.payload {
                    EventPayload::AlertRaised(alert) => {
                        println!("{} alert  {}", at, alert_line(&alert));
                    }
                    EventPayload::SanctionChanged { employee_id, outcome } => {
                        println!("{} sanction  {}: {}", at, employee_id, outcome_line(&outcome));
                    }
                    EventPayload::BanExpired { employee_id } => {
                        println!("{} ban expired  {}", at, employee_id);
                    }
                    EventPayload::NotificationFailed(job) => {
                        println!("{} delivery failed  {}", at, job_line(&job));
                    }
                }
            }
        }
    }
}

fn print_payload(payload: &ResponsePayload) {
    match payload {
        ResponsePayload::AlertsChecked { checked_at, created } => {
            println!(
                "Checked at {}: {} new alert(s)",
                checked_at.format("%Y-%m-%d %H:%M"),
                created.len()
            );
            for alert in created {
                println!("  {}", alert_line(alert));
            }
        }
        ResponsePayload::BansExpired { employees } => {
            if employees.is_empty() {
                println!("No bans expired");
            }
            for id in employees {
                println!("Ban lifted: {}", id);
            }
        }
        ResponsePayload::ComplaintRecorded(outcome) => println!("{}", outcome_line(outcome)),
        ResponsePayload::PresenceRecorded { authorized } => {
            println!("Presence recorded (authorized: {})", authorized);
        }
        ResponsePayload::Alerts(alerts) => {
            if alerts.is_empty() {
                println!("No alerts");
            }
            for alert in alerts {
                println!("{}", alert_line(alert));
            }
        }
        ResponsePayload::Sanction(record) => print_sanction(record),
        ResponsePayload::Notifications(jobs) => {
            if jobs.is_empty() {
                println!("No notifications");
            }
            for job in jobs {
                println!("{}", job_line(job));
            }
        }
        ResponsePayload::NotificationRequeued { job_id } => {
            println!("Job {} requeued for one more attempt", job_id);
        }
        ResponsePayload::Subscribed { client_id } => println!("Subscribed as {}", client_id),
        ResponsePayload::Unsubscribed => println!("Unsubscribed"),
        ResponsePayload::Health(health) => {
            println!("Live:                   {}", health.live);
            let store = if health.store_ok { "ok" } else { "unavailable" };
            println!("Store:                  {}", store);
            println!("Employees:              {}", health.employee_count);
            println!("Pending notifications:  {}", health.pending_notifications);
            println!("Failed notifications:   {}", health.failed_notifications);
        }
        ResponsePayload::Pong => println!("pong"),
    }
}

fn alert_line(alert: &AlertEvent) -> String {
    format!(
        "#{} {} {} on {} (raised {})",
        alert.id,
        alert.employee_id,
        alert.kind.as_str(),
        alert.window_date,
        alert.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn job_line(job: &NotificationJob) -> String {
    let mut line = format!(
        "#{} {} {} -> {} [{}] attempts={}",
        job.id,
        job.kind.as_str(),
        job.channel.as_str(),
        job.recipient,
        job.status.as_str(),
        job.attempt_count
    );
    if let Some(error) = &job.last_error {
        line.push_str(&format!(" error: {}", error));
    }
    line
}

fn outcome_line(outcome: &SanctionOutcome) -> String {
    match outcome {
        SanctionOutcome::Warned { record } => {
            format!("Warning issued (complaints: {})", record.complaint_count)
        }
        SanctionOutcome::Banned { record, ban } => format!(
            "Banned until {} (complaints: {})",
            ban.end.format("%Y-%m-%d %H:%M"),
            record.complaint_count
        ),
        SanctionOutcome::AlreadyBanned { record } => {
            format!("Already banned, complaint counted (complaints: {})", record.complaint_count)
        }
        SanctionOutcome::Duplicate { complaint_id } => {
            format!("Complaint {} was already processed", complaint_id)
        }
    }
}

fn print_sanction(record: &SanctionRecord) {
    println!("Employee:    {}", record.employee_id);
    println!("State:       {:?}", record.state());
    println!("Complaints:  {}", record.complaint_count);
    if let Some(ban) = &record.active_ban {
        println!(
            "Ban:         {} until {}",
            ban.start.format("%Y-%m-%d %H:%M"),
            ban.end.format("%Y-%m-%d %H:%M")
        );
    }
    if let Some(updated) = &record.updated_at {
        println!("Updated:     {}", updated.format("%Y-%m-%d %H:%M"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complain_builds_a_complaint_command() {
        let cli = Cli::try_parse_from([
            "parkwatchctl",
            "--socket",
            "/tmp/pw.sock",
            "complain",
            "e-100",
            "--complaint-id",
            "c-1",
            "--spot",
            "A-12",
        ])
        .unwrap();

        match cli.command.into_command() {
            Command::FileComplaint { complaint } => {
                assert_eq!(complaint.complaint_id, ComplaintId::new("c-1"));
                assert_eq!(complaint.employee_id, EmployeeId::new("e-100"));
                assert_eq!(complaint.spot_id, Some(SpotId::new("A-12")));
                assert_eq!(complaint.evidence_ref, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn notification_status_is_validated() {
        let cli =
            Cli::try_parse_from(["parkwatchctl", "notifications", "--status", "failed"]).unwrap();
        assert!(matches!(
            cli.command.into_command(),
            Command::ListNotifications {
                status: Some(JobStatus::Failed),
                limit: 20
            }
        ));

        let unknown = Cli::try_parse_from(["parkwatchctl", "notifications", "--status", "lost"]);
        assert!(unknown.is_err());
    }
}
