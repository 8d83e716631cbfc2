use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::UnknownStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Available,
    Reserved,
    Booked,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "AVAILABLE",
            TicketStatus::Reserved => "RESERVED",
            TicketStatus::Booked => "BOOKED",
        }
    }

    /// Statuses a ticket may be booked from. AVAILABLE is allowed directly.
    pub fn bookable(&self) -> bool {
        matches!(self, TicketStatus::Available | TicketStatus::Reserved)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(TicketStatus::Available),
            "RESERVED" => Ok(TicketStatus::Reserved),
            "BOOKED" => Ok(TicketStatus::Booked),
            _ => Err(UnknownStatus {
                kind: "ticket",
                value: s.to_string(),
            }),
        }
    }
}

/// A sellable seat for one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub event_id: i64,
    pub price: Decimal,
    pub status: TicketStatus,
    pub reserved_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    /// True when the ticket is held by `correlation_id`, reserved or booked.
    pub fn held_by(&self, correlation_id: &str) -> bool {
        self.status != TicketStatus::Available
            && self.transaction_id.as_deref() == Some(correlation_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub capacity: i32,
    pub tickets_sold: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub name: String,
    pub venue: String,
    pub date: DateTime<Utc>,
    pub capacity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub event_id: i64,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_status_parsing_is_case_insensitive() {
        assert_eq!("reserved".parse::<TicketStatus>().unwrap(), TicketStatus::Reserved);
        assert_eq!("BOOKED".parse::<TicketStatus>().unwrap(), TicketStatus::Booked);
        assert!("SOLD".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_held_by_ignores_available_tickets() {
        let mut ticket = Ticket {
            id: 1,
            event_id: 1,
            price: Decimal::new(2500, 2),
            status: TicketStatus::Reserved,
            reserved_at: Some(Utc::now()),
            transaction_id: Some("booking-1".to_string()),
            created_at: Utc::now(),
        };
        assert!(ticket.held_by("booking-1"));
        assert!(!ticket.held_by("booking-2"));

        ticket.status = TicketStatus::Available;
        assert!(!ticket.held_by("booking-1"));
    }
}
