pub mod clock;
pub mod messaging;
pub mod payment;
pub mod repository;
pub mod schedule;

pub use clock::{Clock, FixedClock, SystemClock};
pub use messaging::{
    publish_json, publish_json_to, Binding, BusError, Delivery, HandlerError, MessageBus,
    MessageHandler, ReconnectBackoff,
};
pub use payment::PaymentProcessor;
pub use repository::{BookingRepository, TicketRepository};
pub use schedule::{JobLease, RunOutcome, ScheduledJob, Scheduler};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Corrupt row: {0}")]
    InvalidRow(String),
    #[error("Lease backend error: {0}")]
    Lease(String),
}

impl From<boxoffice_shared::UnknownStatus> for StoreError {
    fn from(err: boxoffice_shared::UnknownStatus) -> Self {
        StoreError::InvalidRow(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
