use anyhow::Context;
use boxoffice_api::payment_app;
use boxoffice_api::payments::{subscribe_payments, MockPaymentProcessor};
use boxoffice_api::runtime::{connect_bus, init_tracing, serve};
use boxoffice_core::MessageBus;
use boxoffice_store::app_config::Config;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("boxoffice_api=debug,boxoffice_store=info,tower_http=debug");

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting mock payment service on port {}", config.server.payment_port);

    let bus = connect_bus(&config, "mock-payment-service").await;
    let shared_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());

    let rules = &config.business_rules;
    let processor = Arc::new(MockPaymentProcessor::new(
        rules.payment_delay(),
        rules.payment_success_rate,
    ));
    subscribe_payments(shared_bus, processor).await?;

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    serve(payment_app(), config.server.payment_port, shutdown_tx).await?;

    bus.close().await;
    tracing::info!("Mock payment service stopped");
    Ok(())
}
