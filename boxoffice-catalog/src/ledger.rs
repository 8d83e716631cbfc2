use boxoffice_core::messaging::{publish_json, MessageBus};
use boxoffice_core::repository::TicketRepository;
use boxoffice_core::{Clock, StoreError};
use boxoffice_shared::models::events::{
    TicketBookRequested, TicketReleaseRequested, TicketReserveRejected, TicketReserveRequested,
};
use boxoffice_shared::{Event, NewEvent, NewTicket, Ticket, TicketStatus};
use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns ticket state: AVAILABLE -> RESERVED -> BOOKED, with RESERVED -> AVAILABLE
/// on release. BOOKED is terminal.
pub struct TicketLedger {
    tickets: Arc<dyn TicketRepository>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    reservation_hold: Duration,
}

impl TicketLedger {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        reservation_hold: Duration,
    ) -> Self {
        Self {
            tickets,
            bus,
            clock,
            reservation_hold,
        }
    }

    /// Transition: Available → Reserved
    pub async fn reserve_ticket(&self, id: i64, correlation_id: &str) -> Result<Ticket, TicketError> {
        let now = self.clock.now();
        if let Some(ticket) = self.tickets.reserve_if_available(id, correlation_id, now).await? {
            info!("Ticket {} reserved for {}", id, correlation_id);
            return Ok(ticket);
        }

        match self.tickets.find_ticket(id).await? {
            None => Err(TicketError::NotFound(id)),
            Some(ticket) => Err(TicketError::NotAvailable {
                id,
                status: ticket.status,
            }),
        }
    }

    /// Back to Available from any status. Releasing twice is harmless.
    pub async fn release_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        let ticket = self
            .tickets
            .release(id)
            .await?
            .ok_or(TicketError::NotFound(id))?;
        info!("Ticket {} released", id);
        Ok(ticket)
    }

    /// Transition: Available | Reserved → Booked
    pub async fn book_ticket(&self, id: i64, transaction_id: &str) -> Result<Ticket, TicketError> {
        if transaction_id.trim().is_empty() {
            return Err(TicketError::MissingTransaction);
        }

        let current = self
            .tickets
            .find_ticket(id)
            .await?
            .ok_or(TicketError::NotFound(id))?;
        check_bookable(&current)?;

        match self.tickets.book_if_bookable(id, transaction_id).await? {
            Some(ticket) => {
                info!("Ticket {} booked by {}", id, transaction_id);
                Ok(ticket)
            }
            // Lost a race with another writer between the read and the update.
            None => {
                let latest = self
                    .tickets
                    .find_ticket(id)
                    .await?
                    .ok_or(TicketError::NotFound(id))?;
                check_bookable(&latest)?;
                Err(TicketError::InvalidTransition {
                    from: latest.status.to_string(),
                    to: TicketStatus::Booked.to_string(),
                })
            }
        }
    }

    /// Frees reservations older than the hold. Returns how many were released.
    pub async fn release_expired_reservations(&self) -> Result<u64, TicketError> {
        let cutoff = self.clock.now() - self.reservation_hold;
        let released = self.tickets.release_reserved_before(cutoff).await?;
        if released > 0 {
            info!("Released {} stale reservations", released);
        }
        Ok(released)
    }

    pub async fn create_event(&self, event: NewEvent) -> Result<Event, TicketError> {
        if event.name.trim().is_empty() || event.venue.trim().is_empty() {
            return Err(TicketError::Validation("name and venue are required".to_string()));
        }
        if event.capacity < 0 {
            return Err(TicketError::Validation("capacity must not be negative".to_string()));
        }
        Ok(self.tickets.create_event(event, self.clock.now()).await?)
    }

    pub async fn get_event(&self, id: i64) -> Result<Event, TicketError> {
        self.tickets
            .find_event(id)
            .await?
            .ok_or(TicketError::EventNotFound(id))
    }

    pub async fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket, TicketError> {
        if ticket.price < Decimal::ZERO {
            return Err(TicketError::Validation("price must not be negative".to_string()));
        }
        self.get_event(ticket.event_id).await?;
        Ok(self.tickets.create_ticket(ticket, self.clock.now()).await?)
    }

    pub async fn get_ticket(&self, id: i64) -> Result<Ticket, TicketError> {
        self.tickets
            .find_ticket(id)
            .await?
            .ok_or(TicketError::NotFound(id))
    }

    pub async fn get_tickets_by_event(&self, event_id: i64) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.tickets.list_by_event(event_id).await?)
    }

    pub async fn get_tickets_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.tickets.list_by_status(status).await?)
    }

    /// Only AVAILABLE tickets can be deleted.
    pub async fn delete_ticket(&self, id: i64) -> Result<(), TicketError> {
        if self.tickets.delete_if_available(id).await? {
            info!("Ticket {} deleted", id);
            return Ok(());
        }
        let ticket = self.get_ticket(id).await?;
        Err(TicketError::NotAvailable {
            id,
            status: ticket.status,
        })
    }

    /// Reacts to `ticket.reserve`. Never fails; a reservation that cannot be taken
    /// is reported back with `ticket.reserve.rejected`.
    pub async fn on_ticket_reserve_requested(&self, msg: TicketReserveRequested) {
        let reason = match self.reserve_ticket(msg.ticket_id, &msg.booking_id).await {
            Ok(_) => return,
            Err(TicketError::NotAvailable { status, .. }) => {
                match self.tickets.find_ticket(msg.ticket_id).await {
                    Ok(Some(ticket)) if ticket.held_by(&msg.booking_id) => {
                        debug!(
                            "Ticket {} already held by {}, ignoring redelivery",
                            msg.ticket_id, msg.booking_id
                        );
                        return;
                    }
                    _ => format!("ticket is {}", status),
                }
            }
            Err(TicketError::NotFound(_)) => "ticket not found".to_string(),
            Err(e) => {
                error!(
                    "Failed to reserve ticket {} for {}: {}",
                    msg.ticket_id, msg.booking_id, e
                );
                return;
            }
        };

        warn!(
            "Rejecting reservation of ticket {} for {}: {}",
            msg.ticket_id, msg.booking_id, reason
        );
        let rejection = TicketReserveRejected {
            ticket_id: msg.ticket_id,
            booking_id: msg.booking_id,
            reason,
            timestamp: self.clock.now(),
        };
        if let Err(e) = publish_json(self.bus.as_ref(), &rejection).await {
            error!("Failed to publish reservation rejection: {}", e);
        }
    }

    /// Reacts to `ticket.release`. The release is unconditional.
    pub async fn on_ticket_release_requested(&self, msg: TicketReleaseRequested) {
        if let Some(booking_id) = &msg.booking_id {
            if let Ok(Some(ticket)) = self.tickets.find_ticket(msg.ticket_id).await {
                let foreign_holder = ticket.status != TicketStatus::Available
                    && ticket.transaction_id.as_deref() != Some(booking_id.as_str());
                if foreign_holder {
                    warn!(
                        "Releasing ticket {} for {} but it is held by {:?}",
                        msg.ticket_id, booking_id, ticket.transaction_id
                    );
                }
            }
        }

        if let Err(e) = self.release_ticket(msg.ticket_id).await {
            error!(
                "Failed to release ticket {} ({:?}): {}",
                msg.ticket_id, msg.reason, e
            );
        }
    }

    /// Reacts to `ticket.book` once a booking is paid.
    pub async fn on_ticket_book_requested(&self, msg: TicketBookRequested) {
        match self.book_ticket(msg.ticket_id, &msg.booking_id).await {
            Ok(_) => {}
            Err(TicketError::AlreadyBooked(_)) => {
                let same_holder = matches!(
                    self.tickets.find_ticket(msg.ticket_id).await,
                    Ok(Some(ticket)) if ticket.held_by(&msg.booking_id)
                );
                if same_holder {
                    debug!("Ticket {} already booked by {}", msg.ticket_id, msg.booking_id);
                } else {
                    error!(
                        "Ticket {} was booked by someone other than {}",
                        msg.ticket_id, msg.booking_id
                    );
                }
            }
            Err(e) => error!(
                "Failed to book ticket {} for {}: {}",
                msg.ticket_id, msg.booking_id, e
            ),
        }
    }
}

fn check_bookable(ticket: &Ticket) -> Result<(), TicketError> {
    match ticket.status {
        TicketStatus::Booked => Err(TicketError::AlreadyBooked(ticket.id)),
        status if status.bookable() => Ok(()),
        status => Err(TicketError::InvalidTransition {
            from: status.to_string(),
            to: TicketStatus::Booked.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Ticket not found: {0}")]
    NotFound(i64),

    #[error("Event not found: {0}")]
    EventNotFound(i64),

    #[error("Ticket {id} is not available (status: {status})")]
    NotAvailable { id: i64, status: TicketStatus },

    #[error("Transaction ID is required")]
    MissingTransaction,

    #[error("Ticket {0} is already booked")]
    AlreadyBooked(i64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
