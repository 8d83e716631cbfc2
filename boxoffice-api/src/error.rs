use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use boxoffice_booking::BookingError;
use boxoffice_catalog::TicketError;
use boxoffice_core::BusError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    /// Classifies a domain error carried through `?`.
    fn classify(err: anyhow::Error) -> (StatusCode, String) {
        if let Some(e) = err.downcast_ref::<BookingError>() {
            let status = match e {
                BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                BookingError::InvalidState(_) | BookingError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                BookingError::Expired(_) => StatusCode::GONE,
                BookingError::Validation(_) => StatusCode::BAD_REQUEST,
                BookingError::Bus(bus) => bus_status(bus),
                BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, e.to_string());
        }

        if let Some(e) = err.downcast_ref::<TicketError>() {
            let status = match e {
                TicketError::NotFound(_) | TicketError::EventNotFound(_) => StatusCode::NOT_FOUND,
                TicketError::NotAvailable { .. }
                | TicketError::AlreadyBooked(_)
                | TicketError::InvalidTransition { .. } => StatusCode::CONFLICT,
                TicketError::MissingTransaction | TicketError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                TicketError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, e.to_string());
        }

        if let Some(e) = err.downcast_ref::<BusError>() {
            return (bus_status(e), e.to_string());
        }

        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

fn bus_status(err: &BusError) -> StatusCode {
    if err.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Anyhow(err) => Self::classify(err),
        };

        // Internal details stay in the log
        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal Server Error: {}", error_message);
            "Internal Server Error".to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!("{}: {}", status, error_message);
            }
            error_message
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
