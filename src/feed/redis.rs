//! Result feed over a durable Redis list
//!
//! Producers `RPUSH` JSON messages; the consumer takes them with `BLPOP`, so a
//! message is acknowledged the moment it is popped.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{FeedMessage, ResultFeed};
use crate::config::FeedConfig;
use crate::error::{Error, Result};

pub struct RedisListFeed {
    url: String,
    poll_timeout_secs: u64,
    queues: Vec<String>,
    conn: Option<MultiplexedConnection>,
}

impl RedisListFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            url: config.url.clone(),
            poll_timeout_secs: config.poll_timeout_secs.max(1),
            queues: Vec::new(),
            conn: None,
        }
    }

    fn lost(&self, reason: impl Into<String>) -> Error {
        Error::ConnectionLost {
            endpoint: self.url.clone(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for RedisListFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisListFeed")
            .field("url", &self.url)
            .field("queues", &self.queues)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

#[async_trait]
impl ResultFeed for RedisListFeed {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&mut self) -> Result<()> {
        // Registrations are replayed by the consumer after every connect
        self.queues.clear();
        self.conn = None;

        let client = redis::Client::open(self.url.as_str()).map_err(|e| self.lost(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.lost(e.to_string()))?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn subscribe(&mut self, queue: &str) -> Result<()> {
        if !self.queues.iter().any(|q| q == queue) {
            self.queues.push(queue.to_string());
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<FeedMessage>> {
        if self.queues.is_empty() {
            tokio::time::sleep(std::time::Duration::from_secs(self.poll_timeout_secs)).await;
            return Ok(None);
        }

        let Some(conn) = self.conn.as_mut() else {
            return Err(self.lost("not connected"));
        };

        let popped: Option<(String, String)> = match conn
            .blpop(&self.queues, self.poll_timeout_secs as f64)
            .await
        {
            Ok(popped) => popped,
            Err(e) => {
                self.conn = None;
                return Err(self.lost(e.to_string()));
            }
        };

        Ok(popped.map(|(queue, payload)| FeedMessage { queue, payload }))
    }
}
