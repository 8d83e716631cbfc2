use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pii::Masked;
use crate::UnknownStatus;

/// Booking status in the saga lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Failed,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Failed => "FAILED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    /// CONFIRMED and FAILED are reached at most once and never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Failed)
    }

    /// Whether moving into this status stamps `completed_at`.
    pub fn stamps_completion(&self) -> bool {
        self.is_terminal()
    }

    /// Statuses from which a payment may still be submitted.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Expired)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "FAILED" => Ok(BookingStatus::Failed),
            "EXPIRED" => Ok(BookingStatus::Expired),
            other => Err(UnknownStatus {
                kind: "booking",
                value: other.to_string(),
            }),
        }
    }
}

/// A time-boxed hold on one ticket, resolved by payment or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub booking_id: String,
    pub ticket_id: i64,
    pub user_id: String,
    pub amount: Decimal,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment_details: Option<Masked<serde_json::Value>>,
}

impl Booking {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Insert payload for a booking; the store assigns `id`.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_id: String,
    pub ticket_id: i64,
    pub user_id: String,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_column_text() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Failed,
            BookingStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("CANCELLED".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_only_confirmed_and_failed_stamp_completion() {
        assert!(BookingStatus::Confirmed.stamps_completion());
        assert!(BookingStatus::Failed.stamps_completion());
        assert!(!BookingStatus::Expired.stamps_completion());
        assert!(!BookingStatus::Pending.stamps_completion());
    }

    #[test]
    fn test_booking_serializes_camel_case() {
        let now = Utc::now();
        let booking = Booking {
            id: 1,
            booking_id: "booking-1-abc".to_string(),
            ticket_id: 7,
            user_id: "u1".to_string(),
            amount: Decimal::new(5000, 2),
            status: BookingStatus::Pending,
            expires_at: now,
            created_at: now,
            completed_at: None,
            payment_details: None,
        };

        let json = serde_json::to_value(&booking).unwrap();
        assert_eq!(json["bookingId"], "booking-1-abc");
        assert_eq!(json["ticketId"], 7);
        assert_eq!(json["status"], "PENDING");
        assert!(json["completedAt"].is_null());
    }
}
