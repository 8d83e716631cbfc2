use async_trait::async_trait;
use boxoffice_core::repository::BookingRepository;
use boxoffice_core::{StoreError, StoreResult};
use boxoffice_shared::{Booking, BookingStatus, Masked, NewBooking};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;

use crate::db_err;

const BOOKING_COLUMNS: &str = "id, booking_id, ticket_id, user_id, amount, status, expires_at, \
                               created_at, completed_at, payment_details";

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    booking_id: String,
    ticket_id: i64,
    user_id: String,
    amount: Decimal,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    payment_details: Option<Value>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            booking_id: row.booking_id,
            ticket_id: row.ticket_id,
            user_id: row.user_id,
            amount: row.amount,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            completed_at: row.completed_at,
            payment_details: row.payment_details.map(Masked),
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

fn status_texts(statuses: &[BookingStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert_booking(&self, booking: NewBooking) -> StoreResult<Booking> {
        let sql = format!(
            "INSERT INTO bookings (booking_id, ticket_id, user_id, amount, status, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            BOOKING_COLUMNS
        );
        let row: BookingRow = sqlx::query_as(&sql)
            .bind(&booking.booking_id)
            .bind(booking.ticket_id)
            .bind(&booking.user_id)
            .bind(booking.amount)
            .bind(BookingStatus::Pending.as_str())
            .bind(booking.expires_at)
            .bind(booking.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        row.try_into()
    }

    async fn find_by_booking_id(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE booking_id = $1", BOOKING_COLUMNS);
        let row: Option<BookingRow> = sqlx::query_as(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        into_bookings(rows)
    }

    async fn transition_status(
        &self,
        booking_id: &str,
        from: &[BookingStatus],
        to: BookingStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Booking>> {
        let sql = format!(
            "UPDATE bookings SET status = $2, completed_at = $3 \
             WHERE booking_id = $1 AND status = ANY($4) RETURNING {}",
            BOOKING_COLUMNS
        );
        let row: Option<BookingRow> = sqlx::query_as(&sql)
            .bind(booking_id)
            .bind(to.as_str())
            .bind(completed_at)
            .bind(status_texts(from))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn attach_payment_details(
        &self,
        booking_id: &str,
        accepted: &[BookingStatus],
        details: Value,
    ) -> StoreResult<Option<Booking>> {
        let sql = format!(
            "UPDATE bookings SET payment_details = $2 \
             WHERE booking_id = $1 AND status = ANY($3) RETURNING {}",
            BOOKING_COLUMNS
        );
        let row: Option<BookingRow> = sqlx::query_as(&sql)
            .bind(booking_id)
            .bind(details)
            .bind(status_texts(accepted))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_pending_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE status = 'PENDING' AND expires_at < $1 ORDER BY expires_at",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        into_bookings(rows)
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let sql = format!(
            "UPDATE bookings SET status = 'EXPIRED' \
             WHERE status = 'PENDING' AND expires_at < $1 RETURNING {}",
            BOOKING_COLUMNS
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        into_bookings(rows)
    }
}
