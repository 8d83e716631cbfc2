use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

pub const BOOKING_SERVICE: &str = "booking-service";
pub const EVENT_SERVICE: &str = "event-service";
pub const PAYMENT_SERVICE: &str = "mock-payment-service";

/// `GET /health` reporting `{status, service}`.
pub fn routes<S>(service: &'static str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/health",
        get(move || async move { Json(health(service)) }),
    )
}

fn health(service: &str) -> Value {
    json!({ "status": "ok", "service": service })
}
