//! Publish/subscribe over a topic exchange.
//!
//! Routing keys are dot-separated words. Binding patterns use the usual topic
//! wildcards: `*` stands for exactly one word and `#` for zero or more.

use async_trait::async_trait;
use boxoffice_shared::models::events::{exchange_for, exchanges, Routed};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Message channel unavailable")]
    ChannelUnavailable,
    #[error("Publish failed for routing key '{routing_key}': {reason}")]
    PublishFailed { routing_key: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BusError::ChannelUnavailable | BusError::PublishFailed { .. })
    }
}

/// Outcome of a handler that did not succeed. Either way the message is rejected
/// without requeue.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Handler failed: {0}")]
    Failed(String),
}

/// A message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(routing_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
        }
    }

    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, HandlerError> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            HandlerError::Malformed(format!("{} on '{}'", e, self.routing_key))
        })
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}

/// A queue bound to a routing pattern.
///
/// Named queues are durable and shared by every consumer using the same name.
/// Anonymous queues are exclusive to one subscriber and only see new messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub pattern: String,
    pub queue: Option<String>,
}

impl Binding {
    pub fn durable(pattern: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            queue: Some(queue.into()),
        }
    }

    pub fn exclusive(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            queue: None,
        }
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        topic_matches(&self.pattern, routing_key)
    }

    pub fn exchanges(&self) -> Vec<&'static str> {
        exchanges_for_pattern(&self.pattern)
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a persistent message on the exchange selected by the routing key.
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Binds a queue and starts delivering matching messages to `handler`, one at a time.
    async fn subscribe(
        &self,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError>;

    /// Stops all consumers. Later publishes fail with `ChannelUnavailable`.
    async fn close(&self);
}

/// Serializes `message` as JSON and publishes it under its own routing key.
pub async fn publish_json<M>(bus: &dyn MessageBus, message: &M) -> Result<(), BusError>
where
    M: Serialize + Routed + Sync,
{
    publish_json_to(bus, M::ROUTING_KEY, message).await
}

pub async fn publish_json_to<M>(
    bus: &dyn MessageBus,
    routing_key: &str,
    message: &M,
) -> Result<(), BusError>
where
    M: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_vec(message)?;
    bus.publish(routing_key, payload).await
}

/// Topic-exchange pattern match.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Exchanges a pattern can receive messages from.
pub fn exchanges_for_pattern(pattern: &str) -> Vec<&'static str> {
    let first = pattern.split('.').next().unwrap_or_default();
    match first {
        "*" | "#" => vec![exchanges::TICKETS, exchanges::PAYMENTS],
        word => vec![exchange_for(&format!("{}.", word))],
    }
}

/// Exponential reconnect delay, doubling from `base` up to `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_shared::models::events::routing_keys;

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("ticket.*", "ticket.reserve"));
        assert!(!topic_matches("ticket.*", "ticket.reserve.rejected"));
        assert!(!topic_matches("ticket.*", "ticket"));
        assert!(topic_matches("*.completed", "payment.completed"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("ticket.#", "ticket"));
        assert!(topic_matches("ticket.#", "ticket.reserve.rejected"));
        assert!(topic_matches("#", "payment.failed"));
        assert!(topic_matches("#.failed", "payment.failed"));
        assert!(!topic_matches("payment.#", "ticket.release"));
    }

    #[test]
    fn test_literal_pattern_requires_exact_key() {
        assert!(topic_matches(routing_keys::TICKET_RESERVE, routing_keys::TICKET_RESERVE));
        assert!(!topic_matches(routing_keys::TICKET_RESERVE, routing_keys::TICKET_RESERVE_REJECTED));
    }

    #[test]
    fn test_pattern_exchanges() {
        assert_eq!(exchanges_for_pattern("ticket.*"), vec![exchanges::TICKETS]);
        assert_eq!(exchanges_for_pattern("payment.completed"), vec![exchanges::PAYMENTS]);
        assert_eq!(exchanges_for_pattern("#").len(), 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));

        for _ in 0..64 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_malformed_delivery() {
        let delivery = Delivery::new(routing_keys::TICKET_RESERVE, b"not json".to_vec());
        let result: Result<serde_json::Value, _> = delivery.decode();
        assert!(matches!(result, Err(HandlerError::Malformed(_))));
        assert!(BusError::ChannelUnavailable.is_retryable());
    }
}
