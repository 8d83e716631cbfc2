use async_trait::async_trait;
use boxoffice_core::messaging::{Binding, BusError, Delivery, HandlerError, MessageBus, MessageHandler};
use boxoffice_shared::models::events::{queues, routing_keys};
use std::sync::Arc;

use crate::ledger::TicketLedger;

/// Routes ticket messages to the ledger. Business failures are handled inside the
/// ledger, so only malformed payloads are rejected.
pub struct LedgerMessages {
    ledger: Arc<TicketLedger>,
}

impl LedgerMessages {
    pub fn new(ledger: Arc<TicketLedger>) -> Self {
        Self { ledger }
    }

    pub fn bindings() -> Vec<Binding> {
        vec![
            Binding::durable(routing_keys::TICKET_RESERVE, queues::TICKET_RESERVES),
            Binding::durable(routing_keys::TICKET_RELEASE, queues::TICKET_RELEASES),
            Binding::durable(routing_keys::TICKET_BOOK, queues::TICKET_BOOKINGS),
        ]
    }
}

#[async_trait]
impl MessageHandler for LedgerMessages {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        match delivery.routing_key.as_str() {
            routing_keys::TICKET_RESERVE => {
                self.ledger.on_ticket_reserve_requested(delivery.decode()?).await
            }
            routing_keys::TICKET_RELEASE => {
                self.ledger.on_ticket_release_requested(delivery.decode()?).await
            }
            routing_keys::TICKET_BOOK => {
                self.ledger.on_ticket_book_requested(delivery.decode()?).await
            }
            other => {
                return Err(HandlerError::Failed(format!("unexpected routing key {}", other)));
            }
        }
        Ok(())
    }
}

/// Binds the ledger's queues on `bus`.
pub async fn subscribe_ledger(bus: &dyn MessageBus, ledger: Arc<TicketLedger>) -> Result<(), BusError> {
    let handler = Arc::new(LedgerMessages::new(ledger));
    for binding in LedgerMessages::bindings() {
        bus.subscribe(binding, handler.clone()).await?;
    }
    Ok(())
}
