use anyhow::Context;
use boxoffice_api::runtime::{connect_bus, init_tracing, open_database, serve, spawn_sweep, sweep_lease};
use boxoffice_api::{booking_app, BookingState};
use boxoffice_booking::{subscribe_coordinator, BookingCoordinator, ExpirySweeper, SagaMetrics};
use boxoffice_core::{MessageBus, SystemClock};
use boxoffice_store::app_config::Config;
use boxoffice_store::PgBookingRepository;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("boxoffice_booking=debug,boxoffice_api=debug,boxoffice_store=info,tower_http=debug");

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting booking service on port {}", config.server.booking_port);

    let db = open_database(&config).await?;
    let bus = connect_bus(&config, "booking-service").await;
    let shared_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());

    let coordinator = Arc::new(BookingCoordinator::new(
        Arc::new(PgBookingRepository::new(db.pool.clone())),
        shared_bus.clone(),
        Arc::new(SystemClock),
        SagaMetrics::new().context("Failed to register metrics")?,
        config.business_rules.booking_hold(),
    ));
    subscribe_coordinator(shared_bus.as_ref(), coordinator.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = spawn_sweep(
        Arc::new(ExpirySweeper::new(coordinator.clone())),
        &config,
        sweep_lease(&config).await,
        shutdown_rx,
    );

    let app = booking_app(BookingState { coordinator });
    serve(app, config.server.booking_port, shutdown_tx).await?;

    let _ = sweep.await;
    bus.close().await;
    tracing::info!("Booking service stopped");
    Ok(())
}
