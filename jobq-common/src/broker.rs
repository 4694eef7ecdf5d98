//! List broker client.
//!
//! Lanes are Redis lists of pending job ids: submission and retries LPUSH,
//! workers BRPOP. The broker carries no acknowledgement semantics; losing a
//! popped id is tolerated because the store's status check decides ownership
//! and the reaper re-enqueues whatever goes missing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;

/// Enumeration of errors for operations against the broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to open broker client: {error}")]
    ClientError { error: redis::RedisError },
    #[error("{command} command failed with: {error}")]
    CommandError {
        command: String,
        error: redis::RedisError,
    },
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Push a value onto the head of a lane.
    async fn push(&self, lane: &str, value: &str) -> BrokerResult<()>;

    /// Pop from the tail of a lane, blocking up to `timeout`.
    /// Returns `None` when the timeout elapses with the lane empty.
    async fn blocking_pop(&self, lane: &str, timeout: Duration) -> BrokerResult<Option<String>>;

    /// Number of values currently in a lane.
    async fn depth(&self, lane: &str) -> BrokerResult<u64>;

    /// Store a value under a plain key, without TTL.
    async fn put(&self, key: &str, value: &str) -> BrokerResult<()>;

    /// Read back a plain key.
    async fn read(&self, key: &str) -> BrokerResult<Option<String>>;
}

pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(url: String) -> BrokerResult<RedisBroker> {
        let client = redis::Client::open(url).map_err(|error| BrokerError::ClientError { error })?;

        Ok(RedisBroker { client })
    }

    async fn connection(&self) -> BrokerResult<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|error| BrokerError::ClientError { error })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, lane: &str, value: &str) -> BrokerResult<()> {
        let mut conn = self.connection().await?;

        conn.lpush(lane, value)
            .await
            .map_err(|error| BrokerError::CommandError {
                command: "LPUSH".to_owned(),
                error,
            })
    }

    async fn blocking_pop(&self, lane: &str, timeout: Duration) -> BrokerResult<Option<String>> {
        let mut conn = self.connection().await?;

        // BRPOP returns nil on timeout, (lane, value) otherwise.
        let popped: Option<(String, String)> = conn
            .brpop(lane, timeout.as_secs() as f64)
            .await
            .map_err(|error| BrokerError::CommandError {
                command: "BRPOP".to_owned(),
                error,
            })?;

        Ok(popped.map(|(_, value)| value))
    }

    async fn depth(&self, lane: &str) -> BrokerResult<u64> {
        let mut conn = self.connection().await?;

        conn.llen(lane)
            .await
            .map_err(|error| BrokerError::CommandError {
                command: "LLEN".to_owned(),
                error,
            })
    }

    async fn put(&self, key: &str, value: &str) -> BrokerResult<()> {
        let mut conn = self.connection().await?;

        conn.set(key, value)
            .await
            .map_err(|error| BrokerError::CommandError {
                command: "SET".to_owned(),
                error,
            })
    }

    async fn read(&self, key: &str) -> BrokerResult<Option<String>> {
        let mut conn = self.connection().await?;

        conn.get(key)
            .await
            .map_err(|error| BrokerError::CommandError {
                command: "GET".to_owned(),
                error,
            })
    }
}

/// In-memory broker double for tests.
#[derive(Default)]
pub struct MockBroker {
    lanes: Mutex<HashMap<String, VecDeque<String>>>,
    keys: Mutex<HashMap<String, String>>,
}

impl MockBroker {
    pub fn new() -> MockBroker {
        MockBroker::default()
    }

    /// Snapshot of a lane, head first.
    pub fn lane(&self, lane: &str) -> Vec<String> {
        self.lanes
            .lock()
            .expect("mock broker lanes lock poisoned")
            .get(lane)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a plain key.
    pub fn key(&self, key: &str) -> Option<String> {
        self.keys
            .lock()
            .expect("mock broker keys lock poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn push(&self, lane: &str, value: &str) -> BrokerResult<()> {
        self.lanes
            .lock()
            .expect("mock broker lanes lock poisoned")
            .entry(lane.to_owned())
            .or_default()
            .push_front(value.to_owned());

        Ok(())
    }

    async fn blocking_pop(&self, lane: &str, timeout: Duration) -> BrokerResult<Option<String>> {
        let popped = self
            .lanes
            .lock()
            .expect("mock broker lanes lock poisoned")
            .get_mut(lane)
            .and_then(|values| values.pop_back());

        if popped.is_none() {
            // Simulate a bounded block so spinning workers yield in tests.
            tokio::time::sleep(timeout.min(Duration::from_millis(25))).await;
        }

        Ok(popped)
    }

    async fn depth(&self, lane: &str) -> BrokerResult<u64> {
        Ok(self
            .lanes
            .lock()
            .expect("mock broker lanes lock poisoned")
            .get(lane)
            .map(|values| values.len() as u64)
            .unwrap_or(0))
    }

    async fn put(&self, key: &str, value: &str) -> BrokerResult<()> {
        self.keys
            .lock()
            .expect("mock broker keys lock poisoned")
            .insert(key.to_owned(), value.to_owned());

        Ok(())
    }

    async fn read(&self, key: &str) -> BrokerResult<Option<String>> {
        Ok(self
            .keys
            .lock()
            .expect("mock broker keys lock poisoned")
            .get(key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_pops_oldest_first() {
        let broker = MockBroker::new();

        broker.push("lane", "a").await.expect("push failed");
        broker.push("lane", "b").await.expect("push failed");

        assert_eq!(broker.depth("lane").await.expect("depth failed"), 2);

        // Push-left, pop-right: first in, first out.
        let popped = broker
            .blocking_pop("lane", Duration::from_secs(5))
            .await
            .expect("pop failed");
        assert_eq!(popped.as_deref(), Some("a"));

        let popped = broker
            .blocking_pop("lane", Duration::from_secs(5))
            .await
            .expect("pop failed");
        assert_eq!(popped.as_deref(), Some("b"));

        let popped = broker
            .blocking_pop("lane", Duration::from_millis(1))
            .await
            .expect("pop failed");
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_mock_broker_keys() {
        let broker = MockBroker::new();

        assert!(broker.read("k").await.expect("read failed").is_none());
        broker.put("k", "v").await.expect("put failed");
        assert_eq!(broker.read("k").await.expect("read failed").as_deref(), Some("v"));
        assert_eq!(broker.key("k").as_deref(), Some("v"));
    }
}
