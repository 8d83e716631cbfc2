use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use boxoffice_booking::CreateBooking;
use boxoffice_shared::{Booking, BookingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::BookingState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    pub booking_id: String,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentRequest {
    #[serde(default)]
    pub payment_details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentResponse {
    pub booking_id: String,
    pub status: BookingStatus,
    pub message: String,
}

pub fn routes() -> Router<BookingState> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/payment", post(submit_payment))
        .route("/bookings/user/{user_id}", get(get_user_bookings))
        .route("/metrics", get(metrics))
}

async fn create_booking(
    State(state): State<BookingState>,
    Json(req): Json<CreateBooking>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), AppError> {
    let booking = state.coordinator.create_booking(req).await?;
    let minutes = (booking.expires_at - booking.created_at).num_minutes();

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            booking_id: booking.booking_id,
            status: booking.status,
            expires_at: booking.expires_at,
            message: format!("Booking created. Submit payment within {} minutes.", minutes),
        }),
    ))
}

async fn submit_payment(
    State(state): State<BookingState>,
    Path(booking_id): Path<String>,
    Json(req): Json<SubmitPaymentRequest>,
) -> Result<Json<SubmitPaymentResponse>, AppError> {
    let payment_details = match req.payment_details {
        Some(details) if !details.is_null() => details,
        _ => {
            return Err(AppError::Validation(
                "Missing required field: paymentDetails".to_string(),
            ))
        }
    };

    let booking = state
        .coordinator
        .submit_payment(&booking_id, payment_details)
        .await?;

    Ok(Json(SubmitPaymentResponse {
        message: format!(
            "Payment submitted. Poll /bookings/{} for payment status",
            booking.booking_id
        ),
        booking_id: booking.booking_id,
        status: booking.status,
    }))
}

async fn get_booking(
    State(state): State<BookingState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.coordinator.get_booking_by_booking_id(&booking_id).await?))
}

async fn get_user_bookings(
    State(state): State<BookingState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.coordinator.get_bookings_by_user(&user_id).await?))
}

async fn metrics(State(state): State<BookingState>) -> Result<impl IntoResponse, AppError> {
    let body = state.coordinator.metrics().render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
