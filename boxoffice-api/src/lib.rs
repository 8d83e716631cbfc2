use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod health;
pub mod payments;
pub mod runtime;
pub mod state;
pub mod tickets;

pub use state::{BookingState, TicketState};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ])
}

/// Booking service: booking lifecycle, health and metrics.
pub fn booking_app(state: BookingState) -> Router {
    Router::new()
        .merge(bookings::routes())
        .merge(health::routes(health::BOOKING_SERVICE))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Event service: events and the ticket ledger.
pub fn ticket_app(state: TicketState) -> Router {
    Router::new()
        .merge(tickets::routes())
        .merge(health::routes(health::EVENT_SERVICE))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Payment stub. Work arrives over the bus; HTTP only answers health checks.
pub fn payment_app() -> Router {
    Router::new()
        .merge(health::routes(health::PAYMENT_SERVICE))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_payment_health() {
        let response = payment_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "mock-payment-service");
    }
}
