use async_trait::async_trait;
use boxoffice_core::ScheduledJob;
use boxoffice_shared::models::events::ReleaseReason;
use std::sync::Arc;
use tracing::info;

use crate::coordinator::BookingCoordinator;

/// Expires overdue PENDING bookings and asks the ledger to free their tickets.
pub struct ExpirySweeper {
    coordinator: Arc<BookingCoordinator>,
}

impl ExpirySweeper {
    pub fn new(coordinator: Arc<BookingCoordinator>) -> Self {
        Self { coordinator }
    }

    /// One sweep. Returns the number of bookings this run expired.
    pub async fn sweep(&self) -> Result<usize, crate::BookingError> {
        let candidates = self.coordinator.get_pending_expired_bookings().await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        // Only rows this run transitioned get a release; a concurrent payment
        // outcome may have settled some candidates already.
        let expired = self.coordinator.expire_overdue().await?;
        for booking in &expired {
            self.coordinator
                .request_release(booking, ReleaseReason::BookingExpired)
                .await;
        }

        info!(
            "Expiry sweep: {} candidates, {} expired",
            candidates.len(),
            expired.len()
        );
        Ok(expired.len())
    }
}

#[async_trait]
impl ScheduledJob for ExpirySweeper {
    fn name(&self) -> &str {
        "booking-expiry-sweep"
    }

    async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.sweep().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CreateBooking;
    use crate::metrics::SagaMetrics;
    use boxoffice_core::{FixedClock, RunOutcome, Scheduler};
    use boxoffice_shared::models::events::routing_keys;
    use boxoffice_shared::BookingStatus;
    use boxoffice_store::{InMemoryBookingRepository, InMemoryBus};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    fn setup() -> (Arc<BookingCoordinator>, InMemoryBus, Arc<FixedClock>) {
        let bus = InMemoryBus::new();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let coordinator = Arc::new(BookingCoordinator::new(
            Arc::new(InMemoryBookingRepository::new()),
            Arc::new(bus.clone()),
            clock.clone(),
            SagaMetrics::new().unwrap(),
            Duration::minutes(10),
        ));
        (coordinator, bus, clock)
    }

    async fn book(coordinator: &BookingCoordinator, ticket_id: i64) -> String {
        coordinator
            .create_booking(CreateBooking {
                ticket_id,
                user_id: "u1".to_string(),
                amount: Decimal::ONE,
            })
            .await
            .unwrap()
            .booking_id
    }

    #[tokio::test]
    async fn test_sweep_expires_and_releases() {
        let (coordinator, bus, clock) = setup();
        let stale = book(&coordinator, 1).await;
        clock.advance(Duration::minutes(11));
        let fresh = book(&coordinator, 2).await;

        let sweeper = ExpirySweeper::new(coordinator.clone());
        assert_eq!(sweeper.sweep().await.unwrap(), 1);

        let releases = bus.published_to(routing_keys::TICKET_RELEASE);
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0]["ticketId"], 1);
        assert_eq!(releases[0]["reason"], "booking_expired");
        assert_eq!(releases[0]["bookingId"], stale.as_str());

        let fresh = coordinator.get_booking_by_booking_id(&fresh).await.unwrap();
        assert_eq!(fresh.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_overdue_publishes_nothing() {
        let (coordinator, bus, _clock) = setup();
        book(&coordinator, 1).await;
        bus.clear();

        let scheduler = Scheduler::new(
            Arc::new(ExpirySweeper::new(coordinator)),
            std::time::Duration::from_secs(60),
        );
        assert_eq!(scheduler.run_once().await, RunOutcome::Completed);
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_settled_booking_is_not_released() {
        let (coordinator, bus, clock) = setup();
        let paid = book(&coordinator, 1).await;
        coordinator.on_payment_completed(&paid).await;
        clock.advance(Duration::minutes(11));
        bus.clear();

        let sweeper = ExpirySweeper::new(coordinator.clone());
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert!(bus.published_to(routing_keys::TICKET_RELEASE).is_empty());
    }

    #[tokio::test]
    async fn test_release_failure_does_not_fail_sweep() {
        let (coordinator, bus, clock) = setup();
        book(&coordinator, 1).await;
        clock.advance(Duration::minutes(11));
        bus.set_offline(true);

        let sweeper = ExpirySweeper::new(coordinator.clone());
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert!(coordinator.get_pending_expired_bookings().await.unwrap().is_empty());
    }
}
