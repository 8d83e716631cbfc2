use anyhow::Context;
use boxoffice_api::runtime::{connect_bus, init_tracing, open_database, serve, spawn_sweep, sweep_lease};
use boxoffice_api::{ticket_app, TicketState};
use boxoffice_catalog::{subscribe_ledger, ReservationSweeper, TicketLedger};
use boxoffice_core::{MessageBus, SystemClock};
use boxoffice_store::app_config::Config;
use boxoffice_store::PgTicketRepository;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("boxoffice_catalog=debug,boxoffice_api=debug,boxoffice_store=info,tower_http=debug");

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting event service on port {}", config.server.ticket_port);

    let db = open_database(&config).await?;
    let bus = connect_bus(&config, "event-service").await;
    let shared_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());

    let ledger = Arc::new(TicketLedger::new(
        Arc::new(PgTicketRepository::new(db.pool.clone())),
        shared_bus.clone(),
        Arc::new(SystemClock),
        config.business_rules.reservation_hold(),
    ));
    subscribe_ledger(shared_bus.as_ref(), ledger.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = spawn_sweep(
        Arc::new(ReservationSweeper::new(ledger.clone())),
        &config,
        sweep_lease(&config).await,
        shutdown_rx,
    );

    serve(ticket_app(TicketState { ledger }), config.server.ticket_port, shutdown_tx).await?;

    let _ = sweep.await;
    bus.close().await;
    tracing::info!("Event service stopped");
    Ok(())
}
