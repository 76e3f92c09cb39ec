//! parkwatchd - the parking enforcement service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization
//! - The enforcement cycle (alert engine, sanction ledger, gate)
//! - The notification dispatcher
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use parkwatch_config::load_config;
use parkwatch_ipc::IpcServer;
use parkwatch_notify::{Dispatcher, RetryPolicy};
use parkwatch_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use parkwatch_util::default_config_path;
use parkwatchd::{handle_ipc_message, Enforcer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// parkwatchd - attendance alerts, complaint sanctions and gate authorization
#[derive(Parser, Debug)]
#[command(name = "parkwatchd")]
#[command(about = "Parking attendance and sanction enforcement service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/parkwatch/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set PARKWATCH_SOCKET env var)
    #[arg(short, long, env = "PARKWATCH_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set PARKWATCH_DATA_DIR env var)
    #[arg(short, long, env = "PARKWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    enforcer: Arc<Enforcer>,
    dispatcher: Arc<Dispatcher>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            employee_count = config.employees.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("parkwatchd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::DaemonStarted))?;
        store.append_audit(AuditEvent::new(AuditEventType::ConfigLoaded {
            employee_count: config.employees.len(),
        }))?;

        let dispatcher = Dispatcher::from_config(store.clone(), &config.notifications)
            .context("Failed to set up notification transports")?;
        let retry: RetryPolicy = dispatcher.retry_policy();
        info!(
            max_attempts = retry.max_attempts,
            backoff_secs = retry.backoff.as_secs(),
            "Dispatcher initialized"
        );

        let mut ipc = IpcServer::new(&socket_path, config.service.roles.clone());
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        let interval = config.service.evaluation_interval;
        let enforcer = Arc::new(Enforcer::new(config, store.clone()));

        // Repair flags left behind by a crash between a ledger commit and
        // the gate write
        let repaired = enforcer.ledger().reconcile(parkwatch_util::now())?;
        if repaired > 0 {
            warn!(repaired, "Startup reconciliation repaired authorization flags");
        }

        Ok(Self {
            enforcer,
            dispatcher: Arc::new(dispatcher),
            ipc: Arc::new(ipc),
            store,
            interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc = self.ipc.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Dispatcher worker drains queued jobs from previous runs first
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(self.dispatcher.clone().run(self.interval, shutdown_rx));

        // Forward permanent delivery failures to subscribers
        let mut failures = self.dispatcher.subscribe();
        let ipc_events = ipc.clone();
        tokio::spawn(async move {
            loop {
                match failures.recv().await {
                    Ok(event) => ipc_events.broadcast_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dropped notification failure events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let shutdown = shutdown_signal()?;
        tokio::pin!(shutdown);

        let mut tick_timer = tokio::time::interval(self.interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "Service running");

        loop {
            tokio::select! {
                name = &mut shutdown => {
                    info!(signal = name, "Shutting down gracefully");
                    break;
                }

                _ = tick_timer.tick() => {
                    Self::spawn_cycle(&self.enforcer, &ipc, &self.dispatcher);
                }

                Some(msg) = ipc_messages.recv() => {
                    let enforcer = self.enforcer.clone();
                    let ipc = ipc.clone();
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        handle_ipc_message(&enforcer, &ipc, &dispatcher, msg).await;
                    });
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
            warn!("Dispatcher did not stop in time");
        }

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStopped))
        {
            warn!(error = %e, "Could not audit shutdown");
        }

        ipc.shutdown();
        info!("parkwatchd stopped");
        Ok(())
    }

    /// Run one cycle on the blocking pool. A tick that arrives while the
    /// previous cycle is still running is skipped, never queued.
    fn spawn_cycle(enforcer: &Arc<Enforcer>, ipc: &Arc<IpcServer>, dispatcher: &Arc<Dispatcher>) {
        if enforcer.is_cycle_running() {
            warn!("Previous evaluation cycle still running, tick skipped");
            return;
        }

        let enforcer = enforcer.clone();
        let ipc = ipc.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let now = parkwatch_util::now();
            let worker = enforcer.clone();
            let result = tokio::task::spawn_blocking(move || worker.try_cycle(now)).await;

            match result {
                Ok(Some(report)) => {
                    for event in report.events() {
                        ipc.broadcast_event(event);
                    }
                    if report.queued_notifications() {
                        dispatcher.wake();
                    }
                }
                Ok(None) => warn!("Previous evaluation cycle still running, tick skipped"),
                Err(e) => error!(error = %e, "Evaluation cycle panicked"),
            }
        });
    }
}

/// Install the termination handlers; the returned future resolves with the
/// name of the first signal received
fn shutdown_signal() -> Result<impl std::future::Future<Output = &'static str>> {
    let mut term = signal(SignalKind::terminate()).context("Installing SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("Installing SIGINT handler")?;
    let mut hup = signal(SignalKind::hangup()).context("Installing SIGHUP handler")?;

    Ok(async move {
        tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = hup.recv() => "SIGHUP",
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "parkwatchd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
