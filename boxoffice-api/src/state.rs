use boxoffice_booking::BookingCoordinator;
use boxoffice_catalog::TicketLedger;
use std::sync::Arc;

#[derive(Clone)]
pub struct BookingState {
    pub coordinator: Arc<BookingCoordinator>,
}

#[derive(Clone)]
pub struct TicketState {
    pub ledger: Arc<TicketLedger>,
}
