use async_trait::async_trait;
use boxoffice_core::repository::TicketRepository;
use boxoffice_core::{StoreError, StoreResult};
use boxoffice_shared::{Event, NewEvent, NewTicket, Ticket, TicketStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::db_err;

const TICKET_COLUMNS: &str = "id, event_id, price, status, reserved_at, transaction_id, created_at";
const EVENT_COLUMNS: &str = "id, name, venue, date, capacity, tickets_sold, created_at";

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    event_id: i64,
    price: Decimal,
    status: String,
    reserved_at: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            price: row.price,
            status: row.status.parse()?,
            reserved_at: row.reserved_at,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    name: String,
    venue: String,
    date: DateTime<Utc>,
    capacity: i32,
    tickets_sold: i32,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            name: row.name,
            venue: row.venue,
            date: row.date,
            capacity: row.capacity,
            tickets_sold: row.tickets_sold,
            created_at: row.created_at,
        }
    }
}

fn into_tickets(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreResult<Event> {
        let sql = format!(
            "INSERT INTO events (name, venue, date, capacity, tickets_sold, created_at) \
             VALUES ($1, $2, $3, $4, 0, $5) RETURNING {}",
            EVENT_COLUMNS
        );
        let row: EventRow = sqlx::query_as(&sql)
            .bind(&event.name)
            .bind(&event.venue)
            .bind(event.date)
            .bind(event.capacity)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.into())
    }

    async fn find_event(&self, id: i64) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Event::from))
    }

    async fn create_ticket(&self, ticket: NewTicket, now: DateTime<Utc>) -> StoreResult<Ticket> {
        let sql = format!(
            "INSERT INTO tickets (event_id, price, status, created_at) \
             VALUES ($1, $2, 'AVAILABLE', $3) RETURNING {}",
            TICKET_COLUMNS
        );
        let row: TicketRow = sqlx::query_as(&sql)
            .bind(ticket.event_id)
            .bind(ticket.price)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_into()
    }

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn list_by_event(&self, event_id: i64) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE event_id = $1 ORDER BY created_at, id",
            TICKET_COLUMNS
        );
        let rows: Vec<TicketRow> = sqlx::query_as(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        into_tickets(rows)
    }

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE status = $1 ORDER BY id",
            TICKET_COLUMNS
        );
        let rows: Vec<TicketRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        into_tickets(rows)
    }

    async fn reserve_if_available(
        &self,
        id: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'RESERVED', reserved_at = $2, transaction_id = $3 \
             WHERE id = $1 AND status = 'AVAILABLE' RETURNING {}",
            TICKET_COLUMNS
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(now)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn release(&self, id: i64) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'AVAILABLE', reserved_at = NULL, transaction_id = NULL \
             WHERE id = $1 RETURNING {}",
            TICKET_COLUMNS
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn book_if_bookable(&self, id: i64, transaction_id: &str) -> StoreResult<Option<Ticket>> {
        // One statement so the sold counter can never drift from the BOOKED rows.
        let sql = format!(
            "WITH booked AS ( \
                 UPDATE tickets SET status = 'BOOKED', transaction_id = $2 \
                 WHERE id = $1 AND status IN ('AVAILABLE', 'RESERVED') \
                 RETURNING {cols} \
             ), sold AS ( \
                 UPDATE events SET tickets_sold = tickets_sold + 1 \
                 WHERE id = (SELECT event_id FROM booked) \
             ) \
             SELECT {cols} FROM booked",
            cols = TICKET_COLUMNS
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn release_reserved_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE tickets SET status = 'AVAILABLE', reserved_at = NULL, transaction_id = NULL \
             WHERE status = 'RESERVED' AND reserved_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_if_available(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1 AND status = 'AVAILABLE'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
