use async_trait::async_trait;
use boxoffice_shared::{Booking, BookingStatus, Event, NewBooking, NewEvent, NewTicket, Ticket, TicketStatus};
use chrono::{DateTime, Utc};

use crate::StoreResult;

/// Repository trait for booking data access.
///
/// Status changes are compare-and-set: an update only applies while the row is
/// still in one of the `from` statuses, and `None` means nothing matched.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert_booking(&self, booking: NewBooking) -> StoreResult<Booking>;

    async fn find_by_booking_id(&self, booking_id: &str) -> StoreResult<Option<Booking>>;

    /// Newest first.
    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>>;

    async fn transition_status(
        &self,
        booking_id: &str,
        from: &[BookingStatus],
        to: BookingStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Booking>>;

    async fn attach_payment_details(
        &self,
        booking_id: &str,
        accepted: &[BookingStatus],
        details: serde_json::Value,
    ) -> StoreResult<Option<Booking>>;

    /// PENDING bookings with `expires_at < now`. Read only.
    async fn list_pending_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>>;

    /// Moves every PENDING booking with `expires_at < now` to EXPIRED in one write
    /// and returns the rows that changed.
    async fn expire_pending(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>>;
}

/// Repository trait for events and their tickets.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreResult<Event>;

    async fn find_event(&self, id: i64) -> StoreResult<Option<Event>>;

    async fn create_ticket(&self, ticket: NewTicket, now: DateTime<Utc>) -> StoreResult<Ticket>;

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>>;

    /// Oldest first.
    async fn list_by_event(&self, event_id: i64) -> StoreResult<Vec<Ticket>>;

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>>;

    /// AVAILABLE -> RESERVED. `None` when the ticket is missing or not available.
    async fn reserve_if_available(
        &self,
        id: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>>;

    /// Unconditional reset to AVAILABLE. `None` when the ticket is missing.
    async fn release(&self, id: i64) -> StoreResult<Option<Ticket>>;

    /// AVAILABLE | RESERVED -> BOOKED, incrementing the event's `tickets_sold`
    /// in the same atomic write. `None` when nothing transitioned.
    async fn book_if_bookable(&self, id: i64, transaction_id: &str) -> StoreResult<Option<Ticket>>;

    /// Releases RESERVED tickets with `reserved_at < cutoff`.
    async fn release_reserved_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Deletes the ticket only while AVAILABLE.
    async fn delete_if_available(&self, id: i64) -> StoreResult<bool>;
}
