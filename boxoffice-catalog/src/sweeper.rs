use async_trait::async_trait;
use boxoffice_core::ScheduledJob;
use std::sync::Arc;

use crate::ledger::TicketLedger;

/// Safety net for reservations whose booking never resolved.
pub struct ReservationSweeper {
    ledger: Arc<TicketLedger>,
}

impl ReservationSweeper {
    pub fn new(ledger: Arc<TicketLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ScheduledJob for ReservationSweeper {
    fn name(&self) -> &str {
        "ticket-reservation-sweep"
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.ledger.release_expired_reservations().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::{Clock, FixedClock, RunOutcome, Scheduler};
    use boxoffice_shared::{NewEvent, NewTicket, TicketStatus};
    use boxoffice_store::{InMemoryBus, InMemoryTicketRepository};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_sweep_frees_stale_reservation() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let ledger = Arc::new(TicketLedger::new(
            Arc::new(InMemoryTicketRepository::new()),
            Arc::new(InMemoryBus::new()),
            clock.clone(),
            Duration::minutes(10),
        ));
        let event = ledger
            .create_event(NewEvent {
                name: "Match".to_string(),
                venue: "Stadium".to_string(),
                date: clock.now(),
                capacity: 1,
            })
            .await
            .unwrap();
        let ticket = ledger
            .create_ticket(NewTicket {
                event_id: event.id,
                price: Decimal::ONE_HUNDRED,
            })
            .await
            .unwrap();
        ledger.reserve_ticket(ticket.id, "booking-1").await.unwrap();

        let scheduler = Scheduler::new(
            Arc::new(ReservationSweeper::new(ledger.clone())),
            std::time::Duration::from_secs(60),
        );

        assert_eq!(scheduler.run_once().await, RunOutcome::Completed);
        assert_eq!(ledger.get_ticket(ticket.id).await.unwrap().status, TicketStatus::Reserved);

        clock.advance(Duration::minutes(11));
        assert_eq!(scheduler.run_once().await, RunOutcome::Completed);
        assert_eq!(ledger.get_ticket(ticket.id).await.unwrap().status, TicketStatus::Available);
    }
}
