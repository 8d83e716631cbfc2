//! Mock payment gateway. Consumes `payment.request` and answers with
//! `payment.completed` or `payment.failed` after a short delay.

use async_trait::async_trait;
use boxoffice_core::messaging::{
    publish_json_to, Binding, BusError, Delivery, HandlerError, MessageBus, MessageHandler,
};
use boxoffice_core::PaymentProcessor;
use boxoffice_shared::models::events::{
    queues, routing_keys, PaymentOutcome, PaymentOutcomeStatus, PaymentRequested,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Approves a fixed share of payments at random.
pub struct MockPaymentProcessor {
    delay: Duration,
    success_rate: f64,
}

const DEFAULT_SUCCESS_RATE: f64 = 0.9;

impl MockPaymentProcessor {
    pub fn new(delay: Duration, success_rate: f64) -> Self {
        let success_rate = if success_rate.is_finite() {
            success_rate.clamp(0.0, 1.0)
        } else {
            warn!("Ignoring success rate {}, using {}", success_rate, DEFAULT_SUCCESS_RATE);
            DEFAULT_SUCCESS_RATE
        };
        Self { delay, success_rate }
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn process(
        &self,
        request: &PaymentRequested,
    ) -> Result<PaymentOutcome, Box<dyn std::error::Error + Send + Sync>> {
        tokio::time::sleep(self.delay).await;

        let approved = rand::thread_rng().gen_bool(self.success_rate);
        let status = if approved {
            PaymentOutcomeStatus::Completed
        } else {
            PaymentOutcomeStatus::Failed
        };

        Ok(PaymentOutcome {
            booking_id: Some(request.booking_id.clone()),
            payment_id: Some(format!("pay_{}", Uuid::new_v4().simple())),
            status,
        })
    }
}

/// Runs each payment request through the processor and publishes the outcome.
pub struct PaymentRequests {
    processor: Arc<dyn PaymentProcessor>,
    bus: Arc<dyn MessageBus>,
}

impl PaymentRequests {
    pub fn new(processor: Arc<dyn PaymentProcessor>, bus: Arc<dyn MessageBus>) -> Self {
        Self { processor, bus }
    }
}

#[async_trait]
impl MessageHandler for PaymentRequests {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let request: PaymentRequested = delivery.decode()?;
        info!(
            "Processing payment for booking {} ({} for ticket {})",
            request.booking_id, request.amount, request.ticket_id
        );

        let outcome = self
            .processor
            .process(&request)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        if let Err(e) = publish_json_to(self.bus.as_ref(), outcome.routing_key(), &outcome).await {
            error!("Failed to publish payment outcome for {}: {}", request.booking_id, e);
            return Err(HandlerError::Failed(e.to_string()));
        }
        info!("Payment for {} {:?}", request.booking_id, outcome.status);
        Ok(())
    }
}

/// Binds `payment-requests` on `bus`.
pub async fn subscribe_payments(
    bus: Arc<dyn MessageBus>,
    processor: Arc<dyn PaymentProcessor>,
) -> Result<(), BusError> {
    let handler = Arc::new(PaymentRequests::new(processor, bus.clone()));
    bus.subscribe(
        Binding::durable(routing_keys::PAYMENT_REQUEST, queues::PAYMENT_REQUESTS),
        handler,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::messaging::publish_json;
    use boxoffice_shared::Masked;
    use boxoffice_store::InMemoryBus;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn request(booking_id: &str) -> PaymentRequested {
        PaymentRequested {
            booking_id: booking_id.to_string(),
            ticket_id: 3,
            user_id: "u1".to_string(),
            amount: Decimal::new(2500, 2),
            payment_details: Masked(json!({"cardNumber": "4242"})),
        }
    }

    #[tokio::test]
    async fn test_always_approving_processor_completes() {
        let processor = MockPaymentProcessor::new(Duration::ZERO, 1.0);
        let outcome = processor.process(&request("booking-1-abc")).await.unwrap();

        assert_eq!(outcome.status, PaymentOutcomeStatus::Completed);
        assert_eq!(outcome.booking_ref(), Some("booking-1-abc"));
        assert!(outcome.payment_id.unwrap().starts_with("pay_"));
    }

    #[tokio::test]
    async fn test_unusable_success_rate_falls_back() {
        assert_eq!(MockPaymentProcessor::new(Duration::ZERO, f64::NAN).success_rate, DEFAULT_SUCCESS_RATE);
        assert_eq!(MockPaymentProcessor::new(Duration::ZERO, f64::INFINITY).success_rate, DEFAULT_SUCCESS_RATE);
        assert_eq!(MockPaymentProcessor::new(Duration::ZERO, 1.5).success_rate, 1.0);

        let outcome = MockPaymentProcessor::new(Duration::ZERO, f64::NAN)
            .process(&request("booking-3-ghi"))
            .await
            .unwrap();
        assert!(outcome.booking_ref().is_some());
    }

    #[tokio::test]
    async fn test_request_is_answered_on_the_bus() {
        let bus = InMemoryBus::new();
        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
        subscribe_payments(shared.clone(), Arc::new(MockPaymentProcessor::new(Duration::ZERO, 0.0)))
            .await
            .unwrap();

        publish_json(shared.as_ref(), &request("booking-2-def")).await.unwrap();
        bus.settle().await;

        let failed = bus.published_to(routing_keys::PAYMENT_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["bookingId"], "booking-2-def");
        assert_eq!(failed[0]["status"], "failed");
        assert!(bus.published_to(routing_keys::PAYMENT_COMPLETED).is_empty());
    }
}
