use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::time::timeout;

use crate::api::StoreError;
use crate::config::Config;
use crate::store::StorageClient;

/// Durable `StorageClient` backed by redis.
pub struct RedisStorage {
    client: redis::Client,
    timeout: Duration,
}

impl RedisStorage {
    pub fn new(addr: String, timeout: Duration) -> Result<RedisStorage, StoreError> {
        let client = redis::Client::open(addr)?;

        Ok(RedisStorage { client, timeout })
    }

    pub fn from_config(config: &Config) -> Result<RedisStorage, StoreError> {
        Self::new(
            config.redis_url.clone(),
            Duration::from_millis(config.storage_timeout_ms),
        )
    }
}

#[async_trait]
impl StorageClient for RedisStorage {
    async fn get(&self, key: String) -> Result<Option<String>, StoreError> {
        // connecting counts against the timeout too
        let results = async move {
            let mut conn = self.client.get_async_connection().await?;
            conn.get::<_, Option<String>>(key).await
        };
        let fut: Result<Option<String>, redis::RedisError> = timeout(self.timeout, results)
            .await
            .map_err(|_| StoreError::Timeout)?;

        Ok(fut?)
    }

    async fn set(&self, key: String, value: String) -> Result<(), StoreError> {
        let results = async move {
            let mut conn = self.client.get_async_connection().await?;
            conn.set::<_, _, ()>(key, value).await
        };
        let fut: Result<(), redis::RedisError> = timeout(self.timeout, results)
            .await
            .map_err(|_| StoreError::Timeout)?;

        Ok(fut?)
    }
}
