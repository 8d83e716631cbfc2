//! Message contracts exchanged between the booking, ticket and payment services.
//!
//! Payloads are camelCase JSON. The routing key selects the exchange by its
//! first segment: `ticket.*` travels on [`exchanges::TICKETS`], everything else
//! on [`exchanges::PAYMENTS`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pii::Masked;

pub mod routing_keys {
    pub const TICKET_RESERVE: &str = "ticket.reserve";
    pub const TICKET_RELEASE: &str = "ticket.release";
    pub const TICKET_BOOK: &str = "ticket.book";
    pub const TICKET_RESERVE_REJECTED: &str = "ticket.reserve.rejected";
    pub const PAYMENT_REQUEST: &str = "payment.request";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
}

pub mod exchanges {
    pub const TICKETS: &str = "tickets";
    pub const PAYMENTS: &str = "payments";
}

/// Durable queue names. Each service owns the queues it consumes from.
pub mod queues {
    pub const BOOKING_PAYMENT_COMPLETED: &str = "booking-payment-completed";
    pub const BOOKING_PAYMENT_FAILED: &str = "booking-payment-failed";
    pub const BOOKING_TICKET_REJECTIONS: &str = "booking-ticket-rejections";
    pub const TICKET_RESERVES: &str = "ticket-reserves";
    pub const TICKET_RELEASES: &str = "ticket-releases";
    pub const TICKET_BOOKINGS: &str = "ticket-bookings";
    pub const PAYMENT_REQUESTS: &str = "payment-requests";
}

/// Exchange a routing key is published on.
pub fn exchange_for(routing_key: &str) -> &'static str {
    if routing_key.starts_with("ticket.") {
        exchanges::TICKETS
    } else {
        exchanges::PAYMENTS
    }
}

/// A payload with a fixed routing key.
pub trait Routed {
    const ROUTING_KEY: &'static str;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketReserveRequested {
    pub ticket_id: i64,
    pub booking_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Routed for TicketReserveRequested {
    const ROUTING_KEY: &'static str = routing_keys::TICKET_RESERVE;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    BookingExpired,
    PaymentFailed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketReleaseRequested {
    pub ticket_id: i64,
    pub reason: ReleaseReason,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
}

impl Routed for TicketReleaseRequested {
    const ROUTING_KEY: &'static str = routing_keys::TICKET_RELEASE;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketBookRequested {
    pub ticket_id: i64,
    pub booking_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Routed for TicketBookRequested {
    const ROUTING_KEY: &'static str = routing_keys::TICKET_BOOK;
}

/// Sent by the ticket ledger when a reservation could not be taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketReserveRejected {
    pub ticket_id: i64,
    pub booking_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Routed for TicketReserveRejected {
    const ROUTING_KEY: &'static str = routing_keys::TICKET_RESERVE_REJECTED;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequested {
    pub booking_id: String,
    pub ticket_id: i64,
    pub user_id: String,
    pub amount: Decimal,
    pub payment_details: Masked<serde_json::Value>,
}

impl Routed for PaymentRequested {
    const ROUTING_KEY: &'static str = routing_keys::PAYMENT_REQUEST;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcomeStatus {
    Completed,
    Failed,
}

/// Result of a payment attempt, published as `payment.completed` or `payment.failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub status: PaymentOutcomeStatus,
}

impl PaymentOutcome {
    /// The booking this outcome belongs to. Older publishers only set `paymentId`.
    pub fn booking_ref(&self) -> Option<&str> {
        self.booking_id
            .as_deref()
            .or(self.payment_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn routing_key(&self) -> &'static str {
        match self.status {
            PaymentOutcomeStatus::Completed => routing_keys::PAYMENT_COMPLETED,
            PaymentOutcomeStatus::Failed => routing_keys::PAYMENT_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_selected_by_prefix() {
        assert_eq!(exchange_for(routing_keys::TICKET_RESERVE), exchanges::TICKETS);
        assert_eq!(exchange_for(routing_keys::TICKET_RESERVE_REJECTED), exchanges::TICKETS);
        assert_eq!(exchange_for(routing_keys::PAYMENT_REQUEST), exchanges::PAYMENTS);
        assert_eq!(exchange_for("tickets"), exchanges::PAYMENTS);
    }

    #[test]
    fn test_release_reason_wire_format() {
        let msg: TicketReleaseRequested = serde_json::from_value(serde_json::json!({
            "ticketId": 4,
            "reason": "booking_expired",
            "timestamp": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.reason, ReleaseReason::BookingExpired);
        assert_eq!(msg.booking_id, None);

        let unknown: ReleaseReason = serde_json::from_str("\"admin_override\"").unwrap();
        assert_eq!(unknown, ReleaseReason::Other);
    }

    #[test]
    fn test_payment_outcome_falls_back_to_payment_id() {
        let legacy: PaymentOutcome = serde_json::from_value(serde_json::json!({
            "paymentId": "booking-1-abc",
            "status": "failed"
        }))
        .unwrap();
        assert_eq!(legacy.booking_ref(), Some("booking-1-abc"));
        assert_eq!(legacy.routing_key(), routing_keys::PAYMENT_FAILED);

        let empty = PaymentOutcome {
            booking_id: Some(String::new()),
            payment_id: None,
            status: PaymentOutcomeStatus::Completed,
        };
        assert_eq!(empty.booking_ref(), None);
    }

    #[test]
    fn test_payment_request_amount_is_string_encoded() {
        let msg = PaymentRequested {
            booking_id: "booking-1-abc".to_string(),
            ticket_id: 1,
            user_id: "u1".to_string(),
            amount: Decimal::new(5000, 2),
            payment_details: Masked(serde_json::json!({"cardNumber": "4111111111111111"})),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["amount"], "50.00");
        assert_eq!(json["paymentDetails"]["cardNumber"], "4111111111111111");
        assert!(!format!("{:?}", msg).contains("4111"));
    }
}
