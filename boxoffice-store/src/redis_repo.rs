use async_trait::async_trait;
use boxoffice_core::{JobLease, StoreError, StoreResult};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Redis-backed lease so only one replica runs a sweep per period.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    owner: String,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            owner: Uuid::new_v4().to_string(),
        })
    }

    pub async fn acquire_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // SET NX: only the first replica in this window gets the key
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&self.owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }
}

#[async_trait]
impl JobLease for RedisClient {
    async fn try_acquire(&self, job: &str, ttl: Duration) -> StoreResult<bool> {
        let key = format!("lease:{}", job);
        // Slightly shorter than the period so the next tick can take it again.
        let ttl_seconds = ttl.as_secs().saturating_sub(1).max(1);
        let acquired = self
            .acquire_lock(&key, ttl_seconds)
            .await
            .map_err(|e| StoreError::Lease(e.to_string()))?;
        debug!("Lease {} acquired: {}", key, acquired);
        Ok(acquired)
    }
}
