//! # Rewards Bridge Server
//!
//! Long-running service that keeps a loyalty ledger in step with presence on
//! the messaging network.
//!
//! ## Startup
//! 1. `.env` files, CLI flags and the JSON config file.
//! 2. Logging (console plus daily JSON file).
//! 3. Ledger store: pool, schema, ping. Fatal on failure.
//! 4. One bounded connect cycle against the messaging daemon. Fatal on failure.
//! 5. Join the monitored channel, seed presence from a full contact snapshot.
//! 6. Event router, cron jobs (accrual tick, health check) and the admin HTTP
//!    surface, all under `tokio-graceful`.
//!
//! On a shutdown signal the supervisor's cancellation token fires so an
//! in-flight reconnect loop stops, then the scheduler is shut down.

mod rewards_logic;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_graceful::Shutdown;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_rewards::configs::{CliArgs, load_config};
use lib_rewards::connections::{LedgerStore, PgLedgerStore};
use lib_rewards::core::{Collaborators, ServiceContext};
use lib_rewards::loggers::setup_logging;
use lib_rewards::network::UtopiaClient;
use lib_rewards::remediation::{SystemctlRestart, WebhookNotifier};
use lib_rewards::utils::SystemClock;

use rewards_logic::downstream::{self, AdminState};
use rewards_logic::jobs;

const APP_NAME: &str = "server_rewards";

/// Loads `.env` and then the platform specific `.env.linux` / `.env.windows`.
fn load_dotenv() {
    let dotenv_os: &str = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let cli = CliArgs::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match setup_logging(&config.log_dir, &config.log_level, APP_NAME) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };
    info!("{}", config);

    if let Err(e) = run(config).await {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
    info!("Bye!");
    Ok(())
}

async fn run(config: lib_rewards::configs::ServiceConfig) -> Result<()> {
    let store = PgLedgerStore::new(&config.database).context("creating ledger store pool")?;
    store.migrate().await.context("bootstrapping ledger schema")?;
    store.ping().await.context("ledger store unreachable at startup")?;
    info!("ledger store ready");

    let client = UtopiaClient::new(&config.network).context("building messaging client")?;

    let cancel = CancellationToken::new();
    let parts = Collaborators {
        client: Arc::new(client),
        store: Arc::new(store),
        escalation: Arc::new(SystemctlRestart::new(config.remediation.clone())),
        notifier: Arc::new(WebhookNotifier::new(config.alerts.clone(), APP_NAME)),
        clock: Arc::new(SystemClock),
    };
    let (context, events) = ServiceContext::build(config, parts, cancel.clone());

    context
        .supervisor
        .connect_bounded()
        .await
        .context("messaging daemon unreachable at startup")?;
    context.join_channel().await;
    context
        .initial_reconcile()
        .await
        .context("initial presence snapshot failed")?;

    let shutdown: Shutdown = Shutdown::default();

    let token = cancel.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: cancelling supervisor");
        token.cancel();
    });

    let router = context.router.clone();
    let router_cancel = cancel.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        router.run(events, router_cancel).await;
        drop(guard);
    });

    let admin_state = AdminState {
        console: context.console.clone(),
        supervisor: context.supervisor.clone(),
        presence: context.presence.clone(),
        token: context.config.admin_http.token.clone(),
    };
    let bind = context.config.admin_http.bind.clone();
    shutdown.spawn_task_fn(move |guard| downstream::run(bind, admin_state, guard));

    let mut scheduler = jobs::start(
        context.accrual.clone(),
        context.supervisor.clone(),
        context.config.accrual.interval(),
        Duration::from_secs(context.config.health.interval_minutes * 60),
    )
    .await
    .context("starting scheduler")?;

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    cancel.cancel();
    if let Err(e) = scheduler.shutdown().await {
        error!("scheduler shutdown failed: {}", e);
    }
    Ok(())
}
