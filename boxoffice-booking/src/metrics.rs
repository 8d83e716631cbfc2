use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the booking saga, held in a per-service registry.
#[derive(Clone)]
pub struct SagaMetrics {
    registry: Registry,
    bookings_created: IntCounter,
    payments_submitted: IntCounter,
    transitions: IntCounterVec,
    releases_published: IntCounterVec,
}

impl SagaMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings_created =
            IntCounter::new("boxoffice_bookings_created_total", "Bookings created")?;
        let payments_submitted =
            IntCounter::new("boxoffice_payments_submitted_total", "Payment requests forwarded")?;
        let transitions = IntCounterVec::new(
            Opts::new("boxoffice_booking_transitions_total", "Booking status transitions"),
            &["status"],
        )?;
        let releases_published = IntCounterVec::new(
            Opts::new("boxoffice_ticket_releases_total", "Compensating ticket releases"),
            &["reason", "outcome"],
        )?;

        registry.register(Box::new(bookings_created.clone()))?;
        registry.register(Box::new(payments_submitted.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(releases_published.clone()))?;

        Ok(Self {
            registry,
            bookings_created,
            payments_submitted,
            transitions,
            releases_published,
        })
    }

    pub fn booking_created(&self) {
        self.bookings_created.inc();
    }

    pub fn payment_submitted(&self) {
        self.payments_submitted.inc();
    }

    pub fn transitioned(&self, status: &str) {
        self.transitions.with_label_values(&[status]).inc();
    }

    pub fn release_published(&self, reason: &str, delivered: bool) {
        let outcome = if delivered { "published" } else { "dropped" };
        self.releases_published.with_label_values(&[reason, outcome]).inc();
    }

    pub fn transitions_to(&self, status: &str) -> u64 {
        self.transitions.with_label_values(&[status]).get()
    }

    /// Text exposition format for `GET /metrics`.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
