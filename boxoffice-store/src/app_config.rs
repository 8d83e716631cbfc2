use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub booking_port: u16,
    pub ticket_port: u16,
    pub payment_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    /// Forward rejected messages to `<exchange>-dead-letter`.
    pub dead_letter: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            dead_letter: true,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
        }
    }
}

impl MessagingConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// How long a PENDING booking waits for payment.
    pub booking_hold_seconds: u64,
    /// Safety net after which the ledger frees a RESERVED ticket on its own.
    pub reservation_hold_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub payment_delay_ms: u64,
    pub payment_success_rate: f64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            booking_hold_seconds: 600,
            reservation_hold_seconds: 600,
            sweep_interval_seconds: 60,
            payment_delay_ms: 500,
            payment_success_rate: 0.9,
        }
    }
}

impl BusinessRules {
    pub fn booking_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.booking_hold_seconds as i64)
    }

    pub fn reservation_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_hold_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn payment_delay(&self) -> Duration {
        Duration::from_millis(self.payment_delay_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `BOXOFFICE__KAFKA__BROKERS=kafka:9092`
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let rules = &self.business_rules;
        if rules.sweep_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "business_rules.sweep_interval_seconds must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&rules.payment_success_rate) {
            return Err(config::ConfigError::Message(
                "business_rules.payment_success_rate must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }
}
