//! Kafka-backed topic exchange.
//!
//! Each exchange is a topic. The routing key travels as the message key and in
//! a `routing-key` header. A named queue is a consumer group with committed
//! offsets. An anonymous queue is a throwaway group that starts at the tail.
//! Consumers filter by pattern and commit after every message, so a failed
//! handler never causes redelivery.

use async_trait::async_trait;
use boxoffice_core::messaging::{Binding, BusError, Delivery, HandlerError, MessageBus, MessageHandler};
use boxoffice_core::ReconnectBackoff;
use boxoffice_shared::models::events::exchange_for;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app_config::MessagingConfig;

pub const ROUTING_KEY_HEADER: &str = "routing-key";
const REJECTION_HEADER: &str = "x-rejection-reason";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens broker clients for a [`KafkaBus`].
#[async_trait]
trait Connector: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn open_producer(&self) -> Result<FutureProducer, KafkaError>;

    /// Starts consuming `binding`. The task raises `stopped` before it gives up
    /// on the broker.
    fn start_consumer(
        &self,
        bus: KafkaBus,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
        stopped: Arc<AtomicBool>,
    ) -> JoinHandle<()>;
}

struct KafkaConnector {
    brokers: String,
    service: String,
}

impl KafkaConnector {
    fn create_consumer(&self, binding: &Binding) -> Result<StreamConsumer, KafkaError> {
        let (group_id, offset_reset) = match &binding.queue {
            Some(queue) => (queue.clone(), "earliest"),
            None => (format!("{}-{}", self.service, Uuid::new_v4()), "latest"),
        };

        ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    fn endpoint(&self) -> &str {
        &self.brokers
    }

    async fn open_producer(&self) -> Result<FutureProducer, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.service)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()?;

        // librdkafka connects lazily; ask for metadata to prove the broker is there.
        let probe = producer.clone();
        let probed = tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await;
        match probed {
            Ok(result) => result?,
            Err(e) => {
                error!("Broker metadata probe aborted: {}", e);
                return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::Fail));
            }
        }

        Ok(producer)
    }

    fn start_consumer(
        &self,
        bus: KafkaBus,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
        stopped: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let created = self.create_consumer(&binding);
        tokio::spawn(async move {
            match created {
                Ok(consumer) => bus.consume(consumer, binding, handler, stopped).await,
                Err(e) => {
                    error!("Failed to create consumer for '{}': {}", binding.pattern, e);
                    stopped.store(true, Ordering::SeqCst);
                    bus.connection_lost(&e).await;
                }
            }
        })
    }
}

struct ConsumerTask {
    handle: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl ConsumerTask {
    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

struct Subscription {
    binding: Binding,
    handler: Arc<dyn MessageHandler>,
    consumer: Option<ConsumerTask>,
}

impl Subscription {
    fn needs_consumer(&self) -> bool {
        self.consumer.as_ref().map_or(true, |c| !c.is_live())
    }
}

struct Inner {
    connector: Box<dyn Connector>,
    settings: MessagingConfig,
    producer: RwLock<Option<FutureProducer>>,
    subscriptions: Mutex<Vec<Subscription>>,
    reconnecting: Mutex<()>,
    closed: AtomicBool,
}

/// Owned broker connection shared by every publisher and subscriber in a service.
#[derive(Clone)]
pub struct KafkaBus {
    inner: Arc<Inner>,
}

impl KafkaBus {
    /// Creates a disconnected bus. Call [`KafkaBus::connect`] before publishing.
    pub fn new(brokers: &str, service: &str, settings: MessagingConfig) -> Self {
        let connector = KafkaConnector {
            brokers: brokers.to_string(),
            service: service.to_string(),
        };
        Self::with_connector(Box::new(connector), settings)
    }

    fn with_connector(connector: Box<dyn Connector>, settings: MessagingConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                settings,
                producer: RwLock::new(None),
                subscriptions: Mutex::new(Vec::new()),
                reconnecting: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connects, retrying with backoff until the broker answers or the bus is closed.
    pub async fn connect(&self) {
        self.reconnect().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.producer.read().await.is_some()
    }

    /// Re-establishes the producer and restarts every subscription whose consumer
    /// has stopped. Live consumers are left running. Only one reconnect runs at a
    /// time; concurrent callers return immediately.
    async fn reconnect(&self) {
        let Ok(_guard) = self.inner.reconnecting.try_lock() else {
            debug!("Reconnect already in progress");
            return;
        };

        let mut backoff = ReconnectBackoff::new(
            self.inner.settings.reconnect_base(),
            self.inner.settings.reconnect_max(),
        );

        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return;
            }
            match self.inner.connector.open_producer().await {
                Ok(producer) => {
                    *self.inner.producer.write().await = Some(producer);
                    info!("Connected to message broker at {}", self.inner.connector.endpoint());
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Broker connection attempt {} failed: {}. Retrying in {:?}",
                        backoff.attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let mut subscriptions = self.inner.subscriptions.lock().await;
        let mut restored = 0;
        for sub in subscriptions.iter_mut().filter(|sub| sub.needs_consumer()) {
            sub.consumer = Some(self.spawn_consumer(sub.binding.clone(), sub.handler.clone()));
            restored += 1;
        }
        if restored > 0 {
            info!("Restored {} subscriptions", restored);
        }
    }

    fn schedule_reconnect(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let bus = self.clone();
        tokio::spawn(async move {
            bus.reconnect().await;
        });
    }

    async fn connection_lost(&self, cause: &KafkaError) {
        let was_connected = self.inner.producer.write().await.take().is_some();
        if was_connected {
            warn!("Lost connection to message broker: {}", cause);
        }
        self.schedule_reconnect();
    }

    fn spawn_consumer(&self, binding: Binding, handler: Arc<dyn MessageHandler>) -> ConsumerTask {
        let stopped = Arc::new(AtomicBool::new(false));
        let handle = self
            .inner
            .connector
            .start_consumer(self.clone(), binding, handler, stopped.clone());
        ConsumerTask { handle, stopped }
    }

    async fn consume(
        &self,
        consumer: StreamConsumer,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
        stopped: Arc<AtomicBool>,
    ) {
        let topics = binding.exchanges();
        if let Err(e) = consumer.subscribe(&topics) {
            error!("Failed to subscribe '{}' to {:?}: {}", binding.pattern, topics, e);
            stopped.store(true, Ordering::SeqCst);
            self.connection_lost(&e).await;
            return;
        }
        info!(
            "Subscribed '{}' on {:?} (queue: {})",
            binding.pattern,
            topics,
            binding.queue.as_deref().unwrap_or("exclusive")
        );

        let mut pause = ReconnectBackoff::new(
            self.inner.settings.reconnect_base(),
            self.inner.settings.reconnect_max(),
        );

        loop {
            let message = match consumer.recv().await {
                Ok(message) => {
                    pause.reset();
                    message
                }
                Err(e) => match recv_failure(&e, &mut pause) {
                    RecvFailure::Disconnected => {
                        stopped.store(true, Ordering::SeqCst);
                        self.connection_lost(&e).await;
                        return;
                    }
                    RecvFailure::Retry(delay) => {
                        error!(
                            "Kafka error on '{}': {}. Retrying in {:?}",
                            binding.pattern, e, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                },
            };

            let routing_key = routing_key_of(&message).unwrap_or_default();
            if binding.matches(&routing_key) {
                let outcome = match message.payload() {
                    Some(payload) => handler.handle(Delivery::new(routing_key.clone(), payload.to_vec())).await,
                    None => Err(HandlerError::Malformed("empty payload".to_string())),
                };

                if let Err(e) = outcome {
                    warn!("Rejecting '{}' on '{}': {}", routing_key, binding.pattern, e);
                    self.dead_letter(&message, &routing_key, &e).await;
                }
            }

            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                warn!(
                    "Failed to commit {}/{}@{} (message may be redelivered): {}",
                    message.topic(),
                    message.partition(),
                    message.offset(),
                    e
                );
            }
        }
    }

    async fn dead_letter<M: Message>(&self, message: &M, routing_key: &str, reason: &HandlerError) {
        if !self.inner.settings.dead_letter {
            return;
        }
        let Some(producer) = self.inner.producer.read().await.clone() else {
            return;
        };

        let topic = format!("{}-dead-letter", message.topic());
        let reason = reason.to_string();
        let payload = message.payload().unwrap_or_default();
        let record = FutureRecord::to(&topic)
            .key(routing_key)
            .payload(payload)
            .headers(
                OwnedHeaders::new()
                    .insert(Header {
                        key: ROUTING_KEY_HEADER,
                        value: Some(routing_key),
                    })
                    .insert(Header {
                        key: REJECTION_HEADER,
                        value: Some(reason.as_str()),
                    }),
            );

        if let Err((e, _)) = producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            warn!("Failed to dead-letter '{}' to {}: {}", routing_key, topic, e);
        }
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::ChannelUnavailable);
        }
        let Some(producer) = self.inner.producer.read().await.clone() else {
            self.schedule_reconnect();
            return Err(BusError::ChannelUnavailable);
        };

        let topic = exchange_for(routing_key);
        let record = FutureRecord::to(topic)
            .key(routing_key)
            .payload(&payload)
            .headers(OwnedHeaders::new().insert(Header {
                key: ROUTING_KEY_HEADER,
                value: Some(routing_key),
            }));

        match producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok(delivery) => {
                debug!(
                    "Sent {} to {}: partition {} offset {}",
                    routing_key, topic, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send {} to {}: {}", routing_key, topic, e);
                if is_connection_error(&e) {
                    self.connection_lost(&e).await;
                }
                Err(BusError::PublishFailed {
                    routing_key: routing_key.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn subscribe(
        &self,
        binding: Binding,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::ChannelUnavailable);
        }

        // Held across the connectivity check so a finishing reconnect sees this entry.
        let mut subscriptions = self.inner.subscriptions.lock().await;
        let consumer = if self.is_connected().await {
            Some(self.spawn_consumer(binding.clone(), handler.clone()))
        } else {
            info!("Broker offline, '{}' will start after reconnect", binding.pattern);
            None
        };

        subscriptions.push(Subscription {
            binding,
            handler,
            consumer,
        });
        Ok(())
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        for sub in self.inner.subscriptions.lock().await.iter_mut() {
            if let Some(consumer) = sub.consumer.take() {
                consumer.handle.abort();
            }
        }

        if let Some(producer) = self.inner.producer.write().await.take() {
            let flushed = tokio::task::spawn_blocking(move || producer.flush(SEND_TIMEOUT)).await;
            if !matches!(flushed, Ok(Ok(()))) {
                warn!("Producer flush did not complete before close");
            }
        }
        info!("Message bus closed");
    }
}

enum RecvFailure {
    /// The broker is gone; hand over to the reconnect loop.
    Disconnected,
    /// Anything else. Wait before polling again.
    Retry(Duration),
}

fn recv_failure(err: &KafkaError, pause: &mut ReconnectBackoff) -> RecvFailure {
    if is_connection_error(err) {
        RecvFailure::Disconnected
    } else {
        RecvFailure::Retry(pause.next_delay())
    }
}

fn is_connection_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerTransportFailure)
    )
}

/// Routing key from the header, falling back to the message key.
pub fn routing_key_of<M: Message>(message: &M) -> Option<String> {
    let from_header = message.headers().and_then(|headers| {
        headers
            .iter()
            .find(|h| h.key == ROUTING_KEY_HEADER)
            .and_then(|h| h.value)
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::to_string)
    });

    from_header.or_else(|| {
        message
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{OwnedMessage, Timestamp};
    use std::sync::atomic::AtomicUsize;

    /// Connector that fails a set number of connects and records consumer starts.
    #[derive(Default)]
    struct StubBroker {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        started: std::sync::Mutex<Vec<String>>,
        /// Consumers for this pattern drop off right after starting.
        flaky_pattern: Option<String>,
    }

    impl StubBroker {
        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for Arc<StubBroker> {
        fn endpoint(&self) -> &str {
            "stub:9092"
        }

        async fn open_producer(&self) -> Result<FutureProducer, KafkaError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::AllBrokersDown));
            }
            ClientConfig::new().set("bootstrap.servers", "localhost:1").create()
        }

        fn start_consumer(
            &self,
            _bus: KafkaBus,
            binding: Binding,
            _handler: Arc<dyn MessageHandler>,
            stopped: Arc<AtomicBool>,
        ) -> JoinHandle<()> {
            self.started.lock().unwrap().push(binding.pattern.clone());
            let flaky = self.flaky_pattern.as_deref() == Some(binding.pattern.as_str());
            tokio::spawn(async move {
                if flaky {
                    stopped.store(true, Ordering::SeqCst);
                    return;
                }
                std::future::pending::<()>().await;
            })
        }
    }

    struct Ignore;

    #[async_trait]
    impl MessageHandler for Ignore {
        async fn handle(&self, _delivery: Delivery) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn stub_bus(broker: &Arc<StubBroker>) -> KafkaBus {
        let settings = MessagingConfig {
            reconnect_base_ms: 1,
            reconnect_max_ms: 4,
            ..MessagingConfig::default()
        };
        KafkaBus::with_connector(Box::new(broker.clone()), settings)
    }

    fn message(key: Option<&str>, header: Option<&str>) -> OwnedMessage {
        let headers = header.map(|value| {
            OwnedHeaders::new().insert(Header {
                key: ROUTING_KEY_HEADER,
                value: Some(value),
            })
        });
        OwnedMessage::new(
            Some(b"{}".to_vec()),
            key.map(|k| k.as_bytes().to_vec()),
            "tickets".to_string(),
            Timestamp::NotAvailable,
            0,
            0,
            headers,
        )
    }

    #[test]
    fn test_routing_key_prefers_header() {
        let msg = message(Some("ticket.reserve"), Some("ticket.release"));
        assert_eq!(routing_key_of(&msg).as_deref(), Some("ticket.release"));
    }

    #[test]
    fn test_routing_key_falls_back_to_message_key() {
        let msg = message(Some("ticket.reserve"), None);
        assert_eq!(routing_key_of(&msg).as_deref(), Some("ticket.reserve"));
        assert_eq!(routing_key_of(&message(None, None)), None);
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_publish() {
        let bus = KafkaBus::new("localhost:9092", "test", MessagingConfig::default());
        bus.close().await;

        let published = bus.publish("ticket.reserve", b"{}".to_vec()).await;
        assert!(matches!(published, Err(BusError::ChannelUnavailable)));
        assert!(!bus.is_connected().await);
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_share_one_connect_loop() {
        let broker = Arc::new(StubBroker {
            failures_left: AtomicUsize::new(2),
            ..Default::default()
        });
        let bus = stub_bus(&broker);

        tokio::join!(bus.connect(), bus.reconnect(), bus.reconnect());

        // Two failures and one success from a single loop.
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
        assert!(bus.is_connected().await);
    }

    #[tokio::test]
    async fn test_offline_subscription_starts_after_connect() {
        let broker = Arc::new(StubBroker::default());
        let bus = stub_bus(&broker);

        bus.subscribe(Binding::durable("ticket.reserve", "ticket-reservations"), Arc::new(Ignore))
            .await
            .unwrap();
        assert!(broker.started().is_empty());

        bus.connect().await;
        assert_eq!(broker.started(), vec!["ticket.reserve"]);
    }

    #[tokio::test]
    async fn test_reconnect_restarts_stopped_consumers_only() {
        let broker = Arc::new(StubBroker {
            flaky_pattern: Some("payment.failed".to_string()),
            ..Default::default()
        });
        let bus = stub_bus(&broker);
        bus.connect().await;

        bus.subscribe(Binding::durable("payment.completed", "payment-completed"), Arc::new(Ignore))
            .await
            .unwrap();
        bus.subscribe(Binding::durable("payment.failed", "payment-failed"), Arc::new(Ignore))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.reconnect().await;

        assert_eq!(
            broker.started(),
            vec!["payment.completed", "payment.failed", "payment.failed"]
        );
        let subscriptions = bus.inner.subscriptions.lock().await;
        assert!(subscriptions[0].consumer.as_ref().unwrap().is_live());
    }

    #[test]
    fn test_consumer_errors_pause_or_hand_over() {
        let mut pause = ReconnectBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let transient = KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition);

        assert!(matches!(
            recv_failure(&transient, &mut pause),
            RecvFailure::Retry(d) if d == Duration::from_secs(1)
        ));
        assert!(matches!(
            recv_failure(&transient, &mut pause),
            RecvFailure::Retry(d) if d == Duration::from_secs(2)
        ));

        let down = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        assert!(matches!(recv_failure(&down, &mut pause), RecvFailure::Disconnected));
    }
}
