//! Publish primitive behind the dispatcher

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, trace};

use crate::error::{Result, SyncError};

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

/// Redis pub/sub publisher. The connection manager reconnects on its own
/// between publishes.
pub struct RedisPublisher {
    connection: ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| SyncError::Config(format!("invalid redis url: {}", e)))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| SyncError::Publish(format!("failed to connect to {}: {}", redis_url, e)))?;
        info!("Connected to Redis at {}", redis_url);
        Ok(Self { connection })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        trace!("PUBLISH {} {}", topic, payload);
        let mut connection = self.connection.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut connection)
            .await
            .map_err(|e| SyncError::Publish(format!("{}: {}", topic, e)))?;
        Ok(())
    }
}
