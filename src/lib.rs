mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod notifications;
pub mod pours;
mod social;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

pub use config::Config;
pub use db::Database;
pub use http::build_router;

use notifications::{
    generator::NotificationGenerator, rules::default_rules, scheduler::NotificationScheduler,
};

pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub generator: NotificationGenerator,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        let generator = NotificationGenerator::new(
            db.clone(),
            default_rules(config.rule_settings()),
            config.session_window().gap,
        );
        Arc::new(Self {
            db,
            config,
            generator,
        })
    }
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("dramlog starting up...");

    let config = Config::load().context("failed to load configuration")?;
    let database = Database::new(config.database_path.clone())?;

    let state = AppState::new(database, config);

    let shutdown = CancellationToken::new();
    let mut scheduler = NotificationScheduler::new();
    scheduler.start(
        state.generator.clone(),
        std::time::Duration::from_secs(state.config.scheduler_interval_secs),
        shutdown.clone(),
    )?;

    let address = state.config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    log::info!("Server running on {address}");

    let app = build_router(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error");

    shutdown.cancel();
    scheduler.stop().await?;
    log::info!("dramlog shut down");
    served
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
        log::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                log::info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                log::error!("Failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }
}
