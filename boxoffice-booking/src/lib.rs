pub mod coordinator;
pub mod handlers;
pub mod ids;
pub mod metrics;
pub mod sweeper;

pub use coordinator::{BookingCoordinator, BookingError, CreateBooking};
pub use handlers::{subscribe_coordinator, BookingMessages};
pub use metrics::SagaMetrics;
pub use sweeper::ExpirySweeper;
