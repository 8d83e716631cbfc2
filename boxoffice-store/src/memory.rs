//! In-process stand-ins for Postgres and Kafka.
//!
//! Every repository operation runs under one lock, which gives the same
//! compare-and-set behaviour as the conditional `UPDATE ... RETURNING`
//! statements. The bus keeps topic-exchange routing and ack/reject semantics
//! and records everything published.

use async_trait::async_trait;
use boxoffice_core::messaging::{Binding, BusError, Delivery, MessageBus, MessageHandler};
use boxoffice_core::repository::{BookingRepository, TicketRepository};
use boxoffice_core::StoreResult;
use boxoffice_shared::{
    Booking, BookingStatus, Event, Masked, NewBooking, NewEvent, NewTicket, Ticket, TicketStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct BookingTable {
    next_id: i64,
    rows: BTreeMap<i64, Booking>,
}

impl BookingTable {
    fn by_booking_id(&mut self, booking_id: &str) -> Option<&mut Booking> {
        self.rows.values_mut().find(|b| b.booking_id == booking_id)
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    table: Mutex<BookingTable>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert_booking(&self, booking: NewBooking) -> StoreResult<Booking> {
        let mut table = lock(&self.table);
        table.next_id += 1;
        let row = Booking {
            id: table.next_id,
            booking_id: booking.booking_id,
            ticket_id: booking.ticket_id,
            user_id: booking.user_id,
            amount: booking.amount,
            status: BookingStatus::Pending,
            expires_at: booking.expires_at,
            created_at: booking.created_at,
            completed_at: None,
            payment_details: None,
        };
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_booking_id(&self, booking_id: &str) -> StoreResult<Option<Booking>> {
        Ok(lock(&self.table).by_booking_id(booking_id).map(|b| b.clone()))
    }

    async fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let table = lock(&self.table);
        let mut rows: Vec<Booking> = table
            .rows
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn transition_status(
        &self,
        booking_id: &str,
        from: &[BookingStatus],
        to: BookingStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Option<Booking>> {
        let mut table = lock(&self.table);
        Ok(table
            .by_booking_id(booking_id)
            .filter(|b| from.contains(&b.status))
            .map(|b| {
                b.status = to;
                b.completed_at = completed_at;
                b.clone()
            }))
    }

    async fn attach_payment_details(
        &self,
        booking_id: &str,
        accepted: &[BookingStatus],
        details: Value,
    ) -> StoreResult<Option<Booking>> {
        let mut table = lock(&self.table);
        Ok(table
            .by_booking_id(booking_id)
            .filter(|b| accepted.contains(&b.status))
            .map(|b| {
                b.payment_details = Some(Masked(details));
                b.clone()
            }))
    }

    async fn list_pending_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let table = lock(&self.table);
        let mut rows: Vec<Booking> = table
            .rows
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.is_overdue(now))
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.expires_at);
        Ok(rows)
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> StoreResult<Vec<Booking>> {
        let mut table = lock(&self.table);
        Ok(table
            .rows
            .values_mut()
            .filter(|b| b.status == BookingStatus::Pending && b.is_overdue(now))
            .map(|b| {
                b.status = BookingStatus::Expired;
                b.clone()
            })
            .collect())
    }
}

#[derive(Default)]
struct TicketTables {
    next_event_id: i64,
    next_ticket_id: i64,
    events: BTreeMap<i64, Event>,
    tickets: BTreeMap<i64, Ticket>,
}

#[derive(Default)]
pub struct InMemoryTicketRepository {
    tables: Mutex<TicketTables>,
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn make_available(ticket: &mut Ticket) {
    ticket.status = TicketStatus::Available;
    ticket.reserved_at = None;
    ticket.transaction_id = None;
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn create_event(&self, event: NewEvent, now: DateTime<Utc>) -> StoreResult<Event> {
        let mut tables = lock(&self.tables);
        tables.next_event_id += 1;
        let row = Event {
            id: tables.next_event_id,
            name: event.name,
            venue: event.venue,
            date: event.date,
            capacity: event.capacity,
            tickets_sold: 0,
            created_at: now,
        };
        tables.events.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_event(&self, id: i64) -> StoreResult<Option<Event>> {
        Ok(lock(&self.tables).events.get(&id).cloned())
    }

    async fn create_ticket(&self, ticket: NewTicket, now: DateTime<Utc>) -> StoreResult<Ticket> {
        let mut tables = lock(&self.tables);
        tables.next_ticket_id += 1;
        let row = Ticket {
            id: tables.next_ticket_id,
            event_id: ticket.event_id,
            price: ticket.price,
            status: TicketStatus::Available,
            reserved_at: None,
            transaction_id: None,
            created_at: now,
        };
        tables.tickets.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_ticket(&self, id: i64) -> StoreResult<Option<Ticket>> {
        Ok(lock(&self.tables).tickets.get(&id).cloned())
    }

    async fn list_by_event(&self, event_id: i64) -> StoreResult<Vec<Ticket>> {
        let tables = lock(&self.tables);
        let mut rows: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_by_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        Ok(lock(&self.tables)
            .tickets
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn reserve_if_available(
        &self,
        id: i64,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let mut tables = lock(&self.tables);
        Ok(tables
            .tickets
            .get_mut(&id)
            .filter(|t| t.status == TicketStatus::Available)
            .map(|t| {
                t.status = TicketStatus::Reserved;
                t.reserved_at = Some(now);
                t.transaction_id = Some(correlation_id.to_string());
                t.clone()
            }))
    }

    async fn release(&self, id: i64) -> StoreResult<Option<Ticket>> {
        let mut tables = lock(&self.tables);
        Ok(tables.tickets.get_mut(&id).map(|t| {
            make_available(t);
            t.clone()
        }))
    }

    async fn book_if_bookable(&self, id: i64, transaction_id: &str) -> StoreResult<Option<Ticket>> {
        let mut tables = lock(&self.tables);
        let Some(ticket) = tables.tickets.get_mut(&id).filter(|t| t.status.bookable()) else {
            return Ok(None);
        };
        ticket.status = TicketStatus::Booked;
        ticket.transaction_id = Some(transaction_id.to_string());
        let booked = ticket.clone();

        if let Some(event) = tables.events.get_mut(&booked.event_id) {
            event.tickets_sold += 1;
        }
        Ok(Some(booked))
    }

    async fn release_reserved_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = lock(&self.tables);
        let mut released = 0;
        for ticket in tables.tickets.values_mut() {
            let stale = ticket.status == TicketStatus::Reserved
                && ticket.reserved_at.is_some_and(|at| at < cutoff);
            if stale {
                make_available(ticket);
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_if_available(&self, id: i64) -> StoreResult<bool> {
        let mut tables = lock(&self.tables);
        let deletable = tables
            .tickets
            .get(&id)
            .is_some_and(|t| t.status == TicketStatus::Available);
        if deletable {
            tables.tickets.remove(&id);
        }
        Ok(deletable)
    }
}

struct Queue {
    binding: Binding,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BusState {
    queues: Vec<Queue>,
    named: HashMap<String, Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>>,
    published: Vec<(String, Vec<u8>)>,
    rejected: Vec<(String, String)>,
}

#[derive(Default)]
struct BusInner {
    state: Mutex<BusState>,
    offline: AtomicBool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Topic exchange held in memory. Each queue has one ordered worker per
/// subscriber; subscribers sharing a named queue compete for its messages.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a lost broker connection. Publishes fail with `ChannelUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Every accepted publish as `(routing_key, json)`, oldest first.
    pub fn published(&self) -> Vec<(String, Value)> {
        lock(&self.inner.state)
            .published
            .iter()
            .map(|(key, payload)| {
                let json = serde_json::from_slice(payload).unwrap_or(Value::Null);
                (key.clone(), json)
            })
            .collect()
    }

    /// Payloads published under `routing_key`.
    pub fn published_to(&self, routing_key: &str) -> Vec<Value> {
        self.published()
            .into_iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, json)| json)
            .collect()
    }

    /// Rejected deliveries as `(routing_key, reason)`.
    pub fn rejected(&self) -> Vec<(String, String)> {
        lock(&self.inner.state).rejected.clone()
    }

    pub fn clear(&self) {
        let mut state = lock(&self.inner.state);
        state.published.clear();
        state.rejected.clear();
    }

    /// Waits until every delivered message, including any it caused, has been handled.
    pub async fn settle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    fn finish_delivery(inner: &BusInner) {
        if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            inner.idle.notify_waiters();
        }
    }

    fn spawn_worker(
        &self,
        receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let next = receiver.lock().await.recv().await;
                let Some(delivery) = next else {
                    break;
                };
                let routing_key = delivery.routing_key.clone();
                if let Err(e) = handler.handle(delivery).await {
                    lock(&inner.state).rejected.push((routing_key, e.to_string()));
                }
                Self::finish_delivery(&inner);
            }
        });
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) || self.inner.offline.load(Ordering::SeqCst) {
            return Err(BusError::ChannelUnavailable);
        }

        let mut state = lock(&self.inner.state);
        state.published.push((routing_key.to_string(), payload.clone()));
        for queue in state.queues.iter().filter(|q| q.binding.matches(routing_key)) {
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
            if queue.sender.send(Delivery::new(routing_key, payload.clone())).is_err() {
                Self::finish_delivery(&self.inner);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::ChannelUnavailable);
        }

        let receiver = {
            let mut state = lock(&self.inner.state);
            let shared = binding
                .queue
                .as_ref()
                .and_then(|name| state.named.get(name).cloned());
            match shared {
                Some(receiver) => receiver,
                None => {
                    let (sender, receiver) = mpsc::unbounded_channel();
                    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
                    if let Some(name) = &binding.queue {
                        state.named.insert(name.clone(), receiver.clone());
                    }
                    state.queues.push(Queue { binding, sender });
                    receiver
                }
            }
        };

        self.spawn_worker(receiver, handler);
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut state = lock(&self.inner.state);
        state.queues.clear();
        state.named.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::messaging::HandlerError;
    use rust_decimal::Decimal;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn new(fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail_on,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(delivery.routing_key.clone());
            if Some(delivery.routing_key.as_str()) == self.fail_on {
                return Err(HandlerError::Failed("nope".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bus_routes_by_pattern() {
        let bus = InMemoryBus::new();
        let tickets = Recorder::new(None);
        let payments = Recorder::new(None);
        bus.subscribe(Binding::durable("ticket.*", "tickets-q"), tickets.clone())
            .await
            .unwrap();
        bus.subscribe(Binding::exclusive("payment.#"), payments.clone())
            .await
            .unwrap();

        bus.publish("ticket.reserve", b"{}".to_vec()).await.unwrap();
        bus.publish("ticket.reserve.rejected", b"{}".to_vec()).await.unwrap();
        bus.publish("payment.completed", b"{}".to_vec()).await.unwrap();
        bus.settle().await;

        assert_eq!(*tickets.seen.lock().unwrap(), vec!["ticket.reserve"]);
        assert_eq!(*payments.seen.lock().unwrap(), vec!["payment.completed"]);
        assert_eq!(bus.published().len(), 3);
    }

    #[tokio::test]
    async fn test_bus_rejects_failed_handler_without_redelivery() {
        let bus = InMemoryBus::new();
        let handler = Recorder::new(Some("ticket.release"));
        bus.subscribe(Binding::durable("ticket.#", "q"), handler.clone())
            .await
            .unwrap();

        bus.publish("ticket.release", b"{}".to_vec()).await.unwrap();
        bus.publish("ticket.reserve", b"{}".to_vec()).await.unwrap();
        bus.settle().await;

        assert_eq!(handler.seen.lock().unwrap().len(), 2);
        assert_eq!(bus.rejected().len(), 1);
        assert_eq!(bus.rejected()[0].0, "ticket.release");
    }

    #[tokio::test]
    async fn test_offline_bus_fails_fast() {
        let bus = InMemoryBus::new();
        bus.set_offline(true);
        let result = bus.publish("ticket.reserve", b"{}".to_vec()).await;
        assert!(matches!(result, Err(BusError::ChannelUnavailable)));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reservations_have_one_winner() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let now = Utc::now();
        let event = repo
            .create_event(
                NewEvent {
                    name: "Show".to_string(),
                    venue: "Hall".to_string(),
                    date: now,
                    capacity: 1,
                },
                now,
            )
            .await
            .unwrap();
        let ticket = repo
            .create_ticket(
                NewTicket {
                    event_id: event.id,
                    price: Decimal::new(5000, 2),
                },
                now,
            )
            .await
            .unwrap();

        let ticket_id = ticket.id;
        let attempts = (0..8).map(|i| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.reserve_if_available(ticket_id, &format!("booking-{}", i), Utc::now())
                    .await
                    .unwrap()
            })
        });

        let mut winners = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            if attempt.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expire_pending_returns_transitioned_rows() {
        let repo = InMemoryBookingRepository::new();
        let now = Utc::now();
        for (i, minutes) in [-5i64, -1, 5].into_iter().enumerate() {
            repo.insert_booking(NewBooking {
                booking_id: format!("booking-{}", i),
                ticket_id: i as i64,
                user_id: "u1".to_string(),
                amount: Decimal::ONE,
                expires_at: now + chrono::Duration::minutes(minutes),
                created_at: now,
            })
            .await
            .unwrap();
        }

        let expired = repo.expire_pending(now).await.unwrap();
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|b| b.status == BookingStatus::Expired));
        assert!(repo.expire_pending(now).await.unwrap().is_empty());
        assert_eq!(repo.list_pending_expired(now).await.unwrap().len(), 0);
    }
}
