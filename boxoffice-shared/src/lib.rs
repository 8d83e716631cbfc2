pub mod models;
pub mod pii;

pub use models::booking::{Booking, BookingStatus, NewBooking};
pub use models::catalog::{Event, NewEvent, NewTicket, Ticket, TicketStatus};
pub use pii::Masked;

/// Returned when a status column holds a value outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
