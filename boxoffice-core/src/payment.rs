use async_trait::async_trait;
use boxoffice_shared::models::events::{PaymentOutcome, PaymentRequested};

/// Decides the result of a payment request.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Process a payment and report the outcome to publish back to the booking service
    async fn process(
        &self,
        request: &PaymentRequested,
    ) -> Result<PaymentOutcome, Box<dyn std::error::Error + Send + Sync>>;
}
