use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use boxoffice_shared::{Event, NewEvent, NewTicket, Ticket, TicketStatus};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::TicketState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub booking_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    #[serde(default)]
    pub transaction_id: Option<String>,
}

pub fn routes() -> Router<TicketState> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{id}", get(get_event))
        .route("/tickets", post(create_ticket))
        .route("/tickets/{id}", get(get_ticket).delete(delete_ticket))
        .route("/tickets/event/{event_id}", get(get_tickets_by_event))
        .route("/tickets/status/{status}", get(get_tickets_by_status))
        .route("/tickets/{id}/reserve", put(reserve_ticket))
        .route("/tickets/{id}/book", put(book_ticket))
        .route("/tickets/{id}/release", put(release_ticket))
}

async fn create_event(
    State(state): State<TicketState>,
    Json(req): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let event = state.ledger.create_event(req).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, AppError> {
    Ok(Json(state.ledger.get_event(id).await?))
}

async fn create_ticket(
    State(state): State<TicketState>,
    Json(req): Json<NewTicket>,
) -> Result<(StatusCode, Json<Ticket>), AppError> {
    let ticket = state.ledger.create_ticket(req).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ledger.get_ticket(id).await?))
}

async fn get_tickets_by_event(
    State(state): State<TicketState>,
    Path(event_id): Path<i64>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    Ok(Json(state.ledger.get_tickets_by_event(event_id).await?))
}

async fn get_tickets_by_status(
    State(state): State<TicketState>,
    Path(status): Path<String>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let status: TicketStatus = status.parse().map_err(|_| {
        AppError::Validation("Invalid status. Must be: available, reserved, or booked".to_string())
    })?;
    Ok(Json(state.ledger.get_tickets_by_status(status).await?))
}

async fn reserve_ticket(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ledger.reserve_ticket(id, &req.booking_id).await?))
}

async fn book_ticket(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
    Json(req): Json<BookRequest>,
) -> Result<Json<Ticket>, AppError> {
    let transaction_id = req.transaction_id.unwrap_or_default();
    Ok(Json(state.ledger.book_ticket(id, &transaction_id).await?))
}

async fn release_ticket(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.ledger.release_ticket(id).await?))
}

async fn delete_ticket(
    State(state): State<TicketState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.ledger.delete_ticket(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::state::TicketState;
    use crate::ticket_app;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use boxoffice_catalog::TicketLedger;
    use boxoffice_core::SystemClock;
    use boxoffice_store::{InMemoryBus, InMemoryTicketRepository};
    use chrono::Duration;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> TicketState {
        TicketState {
            ledger: Arc::new(TicketLedger::new(
                Arc::new(InMemoryTicketRepository::new()),
                Arc::new(InMemoryBus::new()),
                Arc::new(SystemClock),
                Duration::minutes(10),
            )),
        }
    }

    async fn call(state: &TicketState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = ticket_app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn seed(state: &TicketState) -> (i64, i64) {
        let (status, event) = call(
            state,
            "POST",
            "/events",
            Some(json!({
                "name": "Concert",
                "venue": "Arena",
                "date": "2026-12-01T20:00:00Z",
                "capacity": 100
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let event_id = event["id"].as_i64().unwrap();

        let (status, ticket) = call(
            state,
            "POST",
            "/tickets",
            Some(json!({"eventId": event_id, "price": "49.99"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (event_id, ticket["id"].as_i64().unwrap())
    }

    #[tokio::test]
    async fn test_reserve_book_and_count_sold() {
        let state = state();
        let (event_id, ticket_id) = seed(&state).await;

        let (status, ticket) = call(
            &state,
            "PUT",
            &format!("/tickets/{}/reserve", ticket_id),
            Some(json!({"bookingId": "booking-1-abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ticket["status"], "RESERVED");

        let (status, _) = call(
            &state,
            "PUT",
            &format!("/tickets/{}/reserve", ticket_id),
            Some(json!({"bookingId": "booking-2-def"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&state, "PUT", &format!("/tickets/{}/book", ticket_id), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, ticket) = call(
            &state,
            "PUT",
            &format!("/tickets/{}/book", ticket_id),
            Some(json!({"transactionId": "booking-1-abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ticket["status"], "BOOKED");

        let (status, _) = call(
            &state,
            "PUT",
            &format!("/tickets/{}/book", ticket_id),
            Some(json!({"transactionId": "booking-9-zzz"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, event) = call(&state, "GET", &format!("/events/{}", event_id), None).await;
        assert_eq!(event["ticketsSold"], 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let state = state();
        let (_, ticket_id) = seed(&state).await;

        for _ in 0..2 {
            let (status, ticket) = call(&state, "PUT", &format!("/tickets/{}/release", ticket_id), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(ticket["status"], "AVAILABLE");
        }
    }

    #[tokio::test]
    async fn test_listing_by_status_and_event() {
        let state = state();
        let (event_id, _) = seed(&state).await;

        let (status, tickets) = call(&state, "GET", "/tickets/status/available", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tickets.as_array().unwrap().len(), 1);

        let (status, _) = call(&state, "GET", "/tickets/status/lost", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, tickets) = call(&state, "GET", &format!("/tickets/event/{}", event_id), None).await;
        assert_eq!(tickets.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_only_available_ticket() {
        let state = state();
        let (_, ticket_id) = seed(&state).await;

        call(
            &state,
            "PUT",
            &format!("/tickets/{}/reserve", ticket_id),
            Some(json!({"bookingId": "booking-1-abc"})),
        )
        .await;
        let (status, _) = call(&state, "DELETE", &format!("/tickets/{}", ticket_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        call(&state, "PUT", &format!("/tickets/{}/release", ticket_id), None).await;
        let (status, _) = call(&state, "DELETE", &format!("/tickets/{}", ticket_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&state, "GET", &format!("/tickets/{}", ticket_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ticket_for_unknown_event_is_not_found() {
        let state = state();
        let (status, _) = call(&state, "POST", "/tickets", Some(json!({"eventId": 77, "price": 10}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
