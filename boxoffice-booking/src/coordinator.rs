use boxoffice_core::messaging::{publish_json, BusError, MessageBus};
use boxoffice_core::repository::BookingRepository;
use boxoffice_core::{Clock, StoreError};
use boxoffice_shared::models::events::{
    PaymentRequested, ReleaseReason, TicketBookRequested, TicketReleaseRequested,
    TicketReserveRejected, TicketReserveRequested,
};
use boxoffice_shared::{Booking, BookingStatus, Masked, NewBooking};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ids::generate_booking_id;
use crate::metrics::SagaMetrics;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBooking {
    pub ticket_id: i64,
    pub user_id: String,
    pub amount: Decimal,
}

/// Drives a booking from PENDING to CONFIRMED, FAILED or EXPIRED.
///
/// Every status change is a compare-and-set against the store, so redelivered
/// messages and racing sweeps resolve to at most one transition.
pub struct BookingCoordinator {
    bookings: Arc<dyn BookingRepository>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    metrics: SagaMetrics,
    booking_hold: Duration,
}

impl BookingCoordinator {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        metrics: SagaMetrics,
        booking_hold: Duration,
    ) -> Self {
        Self {
            bookings,
            bus,
            clock,
            metrics,
            booking_hold,
        }
    }

    pub fn metrics(&self) -> &SagaMetrics {
        &self.metrics
    }

    /// Asks the ledger for the ticket, then records a PENDING booking.
    ///
    /// The reservation is not awaited. If the publish fails nothing is stored.
    pub async fn create_booking(&self, request: CreateBooking) -> Result<Booking, BookingError> {
        if request.user_id.trim().is_empty() {
            return Err(BookingError::Validation("userId is required".to_string()));
        }
        if request.amount < Decimal::ZERO {
            return Err(BookingError::Validation("amount must not be negative".to_string()));
        }

        let now = self.clock.now();
        let booking_id = generate_booking_id(now);

        publish_json(
            self.bus.as_ref(),
            &TicketReserveRequested {
                ticket_id: request.ticket_id,
                booking_id: booking_id.clone(),
                timestamp: now,
            },
        )
        .await?;

        let booking = self
            .bookings
            .insert_booking(NewBooking {
                booking_id,
                ticket_id: request.ticket_id,
                user_id: request.user_id,
                amount: request.amount,
                expires_at: now + self.booking_hold,
                created_at: now,
            })
            .await?;

        self.metrics.booking_created();
        info!(
            "Booking {} created for ticket {} (user {})",
            booking.booking_id, booking.ticket_id, booking.user_id
        );
        Ok(booking)
    }

    /// Attaches payment details and forwards the payment request.
    ///
    /// An overdue booking is expired on the spot, its ticket release is requested
    /// and the call fails with `Expired`. This also applies to bookings already
    /// EXPIRED by the sweeper.
    pub async fn submit_payment(
        &self,
        booking_id: &str,
        payment_details: serde_json::Value,
    ) -> Result<Booking, BookingError> {
        let booking = self.get_booking_by_booking_id(booking_id).await?;
        if !booking.status.accepts_payment() {
            return Err(BookingError::InvalidState(booking.status));
        }

        let now = self.clock.now();
        if booking.is_overdue(now) {
            if booking.status == BookingStatus::Pending {
                let expired = self
                    .bookings
                    .transition_status(booking_id, &[BookingStatus::Pending], BookingStatus::Expired, None)
                    .await?;
                match expired {
                    Some(_) => self.metrics.transitioned(BookingStatus::Expired.as_str()),
                    // Settled by a payment outcome in the meantime.
                    None => return Err(self.current_state_error(booking_id).await),
                }
            }
            self.request_release(&booking, ReleaseReason::BookingExpired).await;
            warn!("Payment rejected for {}: booking expired at {}", booking_id, booking.expires_at);
            return Err(BookingError::Expired(booking_id.to_string()));
        }

        let updated = self
            .bookings
            .attach_payment_details(booking_id, &[BookingStatus::Pending], payment_details.clone())
            .await?;
        let Some(updated) = updated else {
            return Err(self.current_state_error(booking_id).await);
        };

        publish_json(
            self.bus.as_ref(),
            &PaymentRequested {
                booking_id: updated.booking_id.clone(),
                ticket_id: updated.ticket_id,
                user_id: updated.user_id.clone(),
                amount: updated.amount,
                payment_details: Masked(payment_details),
            },
        )
        .await?;

        self.metrics.payment_submitted();
        info!("Payment requested for booking {}", booking_id);
        Ok(updated)
    }

    pub async fn get_booking_by_booking_id(&self, booking_id: &str) -> Result<Booking, BookingError> {
        self.bookings
            .find_by_booking_id(booking_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(booking_id.to_string()))
    }

    /// Newest first.
    pub async fn get_bookings_by_user(&self, user_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_by_user(user_id).await?)
    }

    /// Transition: Pending → Confirmed | Failed | Expired
    ///
    /// `completed_at` is stamped only for CONFIRMED and FAILED.
    pub async fn update_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> Result<Booking, BookingError> {
        if status == BookingStatus::Pending {
            let current = self.get_booking_by_booking_id(booking_id).await?;
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let completed_at = status.stamps_completion().then(|| self.clock.now());
        let updated = self
            .bookings
            .transition_status(booking_id, &[BookingStatus::Pending], status, completed_at)
            .await?;

        match updated {
            Some(booking) => {
                self.metrics.transitioned(status.as_str());
                info!("Booking {} is now {}", booking_id, status);
                Ok(booking)
            }
            None => {
                let current = self.get_booking_by_booking_id(booking_id).await?;
                Err(BookingError::InvalidTransition {
                    from: current.status,
                    to: status,
                })
            }
        }
    }

    /// Reacts to `payment.completed`: confirms the booking and books its ticket.
    pub async fn on_payment_completed(&self, booking_id: &str) {
        let Some(booking) = self.apply_outcome(booking_id, BookingStatus::Confirmed).await else {
            return;
        };

        let book = TicketBookRequested {
            ticket_id: booking.ticket_id,
            booking_id: booking.booking_id.clone(),
            timestamp: self.clock.now(),
        };
        if let Err(e) = publish_json(self.bus.as_ref(), &book).await {
            error!("Failed to request booking of ticket {}: {}", booking.ticket_id, e);
        }
    }

    /// Reacts to `payment.failed`: fails the booking and releases its ticket.
    pub async fn on_payment_failed(&self, booking_id: &str) {
        if let Some(booking) = self.apply_outcome(booking_id, BookingStatus::Failed).await {
            self.request_release(&booking, ReleaseReason::PaymentFailed).await;
        }
    }

    /// Reacts to `ticket.reserve.rejected`. The ticket belongs to someone else, so
    /// nothing is released.
    pub async fn on_reservation_rejected(&self, msg: TicketReserveRejected) {
        match self.bookings.find_by_booking_id(&msg.booking_id).await {
            Ok(Some(booking)) if booking.ticket_id != msg.ticket_id => {
                warn!(
                    "Ignoring rejection for {}: ticket {} does not match booking ticket {}",
                    msg.booking_id, msg.ticket_id, booking.ticket_id
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to load booking {}: {}", msg.booking_id, e);
                return;
            }
        }

        if self.apply_outcome(&msg.booking_id, BookingStatus::Failed).await.is_some() {
            info!("Booking {} failed: {}", msg.booking_id, msg.reason);
        }
    }

    /// Moves every overdue PENDING booking to EXPIRED and returns how many changed.
    pub async fn expire_old_bookings(&self) -> Result<usize, BookingError> {
        Ok(self.expire_overdue().await?.len())
    }

    /// Overdue PENDING bookings. Read only.
    pub async fn get_pending_expired_bookings(&self) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list_pending_expired(self.clock.now()).await?)
    }

    /// Bulk expiry returning exactly the bookings this call transitioned.
    pub async fn expire_overdue(&self) -> Result<Vec<Booking>, BookingError> {
        let expired = self.bookings.expire_pending(self.clock.now()).await?;
        for booking in &expired {
            self.metrics.transitioned(BookingStatus::Expired.as_str());
            debug!("Booking {} expired", booking.booking_id);
        }
        if !expired.is_empty() {
            info!("Expired {} overdue bookings", expired.len());
        }
        Ok(expired)
    }

    /// Best-effort compensating release. Failures are logged, never returned.
    pub async fn request_release(&self, booking: &Booking, reason: ReleaseReason) {
        let release = TicketReleaseRequested {
            ticket_id: booking.ticket_id,
            reason,
            timestamp: self.clock.now(),
            booking_id: Some(booking.booking_id.clone()),
        };
        let reason_label = match reason {
            ReleaseReason::BookingExpired => "booking_expired",
            ReleaseReason::PaymentFailed => "payment_failed",
            ReleaseReason::Other => "other",
        };

        match publish_json(self.bus.as_ref(), &release).await {
            Ok(()) => self.metrics.release_published(reason_label, true),
            Err(e) => {
                self.metrics.release_published(reason_label, false);
                error!(
                    "Failed to release ticket {} for booking {}: {}",
                    booking.ticket_id, booking.booking_id, e
                );
            }
        }
    }

    /// Applies a terminal outcome from a message. Returns the booking only when
    /// this call performed the transition.
    async fn apply_outcome(&self, booking_id: &str, status: BookingStatus) -> Option<Booking> {
        match self.update_status(booking_id, status).await {
            Ok(booking) => Some(booking),
            Err(BookingError::NotFound(_)) => {
                warn!("Outcome {} for unknown booking {}", status, booking_id);
                None
            }
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Expired,
                ..
            }) => {
                warn!("Ignoring {} for expired booking {}", status, booking_id);
                None
            }
            Err(BookingError::InvalidTransition { from, .. }) => {
                debug!("Booking {} already {}, ignoring {}", booking_id, from, status);
                None
            }
            Err(e) => {
                error!("Failed to apply {} to booking {}: {}", status, booking_id, e);
                None
            }
        }
    }

    async fn current_state_error(&self, booking_id: &str) -> BookingError {
        match self.get_booking_by_booking_id(booking_id).await {
            Ok(current) => BookingError::InvalidState(current.status),
            Err(e) => e,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found: {0}")]
    NotFound(String),

    #[error("Cannot process payment for booking with status: {0}")]
    InvalidState(BookingStatus),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("Booking has expired: {0}")]
    Expired(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
