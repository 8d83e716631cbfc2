pub mod handlers;
pub mod ledger;
pub mod sweeper;

pub use handlers::{subscribe_ledger, LedgerMessages};
pub use ledger::{TicketError, TicketLedger};
pub use sweeper::ReservationSweeper;
