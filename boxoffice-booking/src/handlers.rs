use async_trait::async_trait;
use boxoffice_core::messaging::{Binding, BusError, Delivery, HandlerError, MessageBus, MessageHandler};
use boxoffice_shared::models::events::{queues, routing_keys, PaymentOutcome};
use std::sync::Arc;

use crate::coordinator::BookingCoordinator;

/// Feeds payment outcomes and reservation rejections into the coordinator.
pub struct BookingMessages {
    coordinator: Arc<BookingCoordinator>,
}

impl BookingMessages {
    pub fn new(coordinator: Arc<BookingCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn bindings() -> Vec<Binding> {
        vec![
            Binding::durable(routing_keys::PAYMENT_COMPLETED, queues::BOOKING_PAYMENT_COMPLETED),
            Binding::durable(routing_keys::PAYMENT_FAILED, queues::BOOKING_PAYMENT_FAILED),
            Binding::durable(
                routing_keys::TICKET_RESERVE_REJECTED,
                queues::BOOKING_TICKET_REJECTIONS,
            ),
        ]
    }

    fn booking_ref(outcome: &PaymentOutcome) -> Result<String, HandlerError> {
        outcome
            .booking_ref()
            .map(str::to_string)
            .ok_or_else(|| HandlerError::Malformed("payment outcome without booking id".to_string()))
    }
}

#[async_trait]
impl MessageHandler for BookingMessages {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        match delivery.routing_key.as_str() {
            routing_keys::PAYMENT_COMPLETED => {
                let outcome: PaymentOutcome = delivery.decode()?;
                let booking_id = Self::booking_ref(&outcome)?;
                self.coordinator.on_payment_completed(&booking_id).await;
            }
            routing_keys::PAYMENT_FAILED => {
                let outcome: PaymentOutcome = delivery.decode()?;
                let booking_id = Self::booking_ref(&outcome)?;
                self.coordinator.on_payment_failed(&booking_id).await;
            }
            routing_keys::TICKET_RESERVE_REJECTED => {
                self.coordinator.on_reservation_rejected(delivery.decode()?).await;
            }
            other => {
                return Err(HandlerError::Failed(format!("unexpected routing key {}", other)));
            }
        }
        Ok(())
    }
}

/// Binds the coordinator's queues on `bus`.
pub async fn subscribe_coordinator(
    bus: &dyn MessageBus,
    coordinator: Arc<BookingCoordinator>,
) -> Result<(), BusError> {
    let handler = Arc::new(BookingMessages::new(coordinator));
    for binding in BookingMessages::bindings() {
        bus.subscribe(binding, handler.clone()).await?;
    }
    Ok(())
}
