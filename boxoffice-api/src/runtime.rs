//! Process wiring shared by the service binaries.

use anyhow::Context;
use axum::Router;
use boxoffice_core::{JobLease, ScheduledJob, Scheduler};
use boxoffice_store::app_config::Config;
use boxoffice_store::{DbClient, KafkaBus, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn open_database(config: &Config) -> anyhow::Result<DbClient> {
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    Ok(db)
}

/// Creates the service's bus and blocks until the broker answers.
pub async fn connect_bus(config: &Config, service: &str) -> KafkaBus {
    let bus = KafkaBus::new(&config.kafka.brokers, service, config.messaging.clone());
    bus.connect().await;
    bus
}

/// Cross-replica sweep lease, when Redis is configured and reachable.
pub async fn sweep_lease(config: &Config) -> Option<Arc<dyn JobLease>> {
    let redis = config.redis.as_ref()?;
    match RedisClient::new(&redis.url).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("Redis unavailable, sweeping without a lease: {}", e);
            None
        }
    }
}

pub fn spawn_sweep(
    job: Arc<dyn ScheduledJob>,
    config: &Config,
    lease: Option<Arc<dyn JobLease>>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut scheduler = Scheduler::new(job, config.business_rules.sweep_interval());
    if let Some(lease) = lease {
        scheduler = scheduler.with_lease(lease);
    }
    scheduler.spawn(shutdown)
}

/// Serves `app` until Ctrl-C or SIGTERM, then flips `shutdown`.
pub async fn serve(app: Router, port: u16, shutdown: watch::Sender<bool>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown.send(true);
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
