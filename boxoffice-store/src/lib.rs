pub mod app_config;
pub mod booking_repo;
pub mod bus;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod ticket_repo;

pub use booking_repo::PgBookingRepository;
pub use bus::KafkaBus;
pub use database::DbClient;
pub use memory::{InMemoryBookingRepository, InMemoryBus, InMemoryTicketRepository};
pub use redis_repo::RedisClient;
pub use ticket_repo::PgTicketRepository;

use boxoffice_core::StoreError;

pub(crate) fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}
