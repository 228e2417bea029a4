//! Historical result feed
//!
//! Round results arrive on a durable queue and become raw distribution
//! templates. [`FeedConsumer`] owns the queue registrations and survives
//! connection loss: it waits a fixed delay, reconnects, and replays every
//! registration before reading again.

pub mod handler;
pub mod redis;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{ErrorCategory, Result, RoundsmithErrorTrait};
use crate::metrics;

pub use self::handler::{ResultMessage, ResultScore, TemplateIngestHandler};
pub use self::redis::RedisListFeed;

/// One message taken off a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub queue: String,
    pub payload: String,
}

/// Transport for the result queue
#[async_trait]
pub trait ResultFeed: Send {
    /// Human-readable endpoint for logs and metrics
    fn endpoint(&self) -> &str;

    async fn connect(&mut self) -> Result<()>;

    async fn subscribe(&mut self, queue: &str) -> Result<()>;

    /// Wait for the next message on any subscribed queue.
    ///
    /// Returns `Ok(None)` when the poll window elapsed without a message.
    async fn next_message(&mut self) -> Result<Option<FeedMessage>>;
}

#[async_trait]
pub trait FeedHandler: Send + Sync {
    async fn handle(&self, message: &FeedMessage) -> Result<()>;
}

/// Counters for one consumer lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub delivered: u64,
    pub failed: u64,
    pub reconnects: u64,
}

pub struct FeedConsumer<F: ResultFeed> {
    feed: F,
    handlers: BTreeMap<String, Arc<dyn FeedHandler>>,
    reconnect_delay: Duration,
    connected: bool,
    stats: FeedStats,
}

impl<F: ResultFeed> FeedConsumer<F> {
    pub fn new(feed: F, reconnect_delay: Duration) -> Self {
        Self {
            feed,
            handlers: BTreeMap::new(),
            reconnect_delay,
            connected: false,
            stats: FeedStats::default(),
        }
    }

    /// Register a handler for a queue; replaces any previous handler
    pub fn register(&mut self, queue: impl Into<String>, handler: Arc<dyn FeedHandler>) -> &mut Self {
        self.handlers.insert(queue.into(), handler);
        self
    }

    pub fn queues(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    /// Consume until `shutdown` flips to `true`
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<FeedStats> {
        tracing::info!(endpoint = self.feed.endpoint(), queues = ?self.queues(), "Starting feed consumer");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !self.connected {
                if let Err(e) = self.establish().await {
                    tracing::warn!(
                        endpoint = self.feed.endpoint(),
                        error = %e,
                        delay_secs = self.reconnect_delay.as_secs_f64(),
                        "Feed connection failed, retrying"
                    );
                    self.note_reconnect();
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }

            match self.feed.next_message().await {
                Ok(Some(message)) => self.dispatch(&message).await,
                Ok(None) => {}
                Err(e) if is_connection_error(&e) => {
                    tracing::warn!(endpoint = self.feed.endpoint(), error = %e, "Feed connection lost");
                    self.connected = false;
                    self.note_reconnect();
                    if self.pause(&mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(endpoint = self.feed.endpoint(), error = %e, "Failed to read from feed");
                }
            }
        }

        tracing::info!(
            delivered = self.stats.delivered,
            failed = self.stats.failed,
            reconnects = self.stats.reconnects,
            "Feed consumer stopped"
        );
        Ok(self.stats.clone())
    }

    /// Connect and replay every registration
    async fn establish(&mut self) -> Result<()> {
        self.feed.connect().await?;
        for queue in self.handlers.keys() {
            self.feed.subscribe(queue).await?;
        }
        self.connected = true;
        tracing::info!(endpoint = self.feed.endpoint(), queues = self.handlers.len(), "Feed connected");
        Ok(())
    }

    async fn dispatch(&mut self, message: &FeedMessage) {
        let Some(handler) = self.handlers.get(&message.queue) else {
            tracing::warn!(queue = %message.queue, "No handler registered for queue");
            self.stats.failed += 1;
            return;
        };

        match handler.handle(message).await {
            Ok(()) => self.stats.delivered += 1,
            Err(e) => {
                tracing::warn!(queue = %message.queue, error = %e, "Feed handler failed");
                self.stats.failed += 1;
            }
        }
    }

    fn note_reconnect(&mut self) {
        self.stats.reconnects += 1;
        metrics::record_feed_reconnect(self.feed.endpoint());
    }

    /// Sleep out the reconnect delay; `true` if shutdown was requested meanwhile
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}

fn is_connection_error(err: &crate::error::Error) -> bool {
    matches!(
        err.category(),
        ErrorCategory::ConnectionLoss | ErrorCategory::TransientIo
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Step {
        FailConnect,
        Message(&'static str, &'static str),
        Drop,
        Garbage,
    }

    #[derive(Default)]
    struct MockLog {
        connects: usize,
        subscriptions: Vec<String>,
    }

    struct MockFeed {
        steps: VecDeque<Step>,
        log: Arc<Mutex<MockLog>>,
        done: watch::Sender<bool>,
    }

    #[async_trait]
    impl ResultFeed for MockFeed {
        fn endpoint(&self) -> &str {
            "mock"
        }

        async fn connect(&mut self) -> Result<()> {
            if matches!(self.steps.front(), Some(Step::FailConnect)) {
                self.steps.pop_front();
                return Err(Error::ConnectionLost {
                    endpoint: "mock".to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.log.lock().unwrap().connects += 1;
            Ok(())
        }

        async fn subscribe(&mut self, queue: &str) -> Result<()> {
            self.log.lock().unwrap().subscriptions.push(queue.to_string());
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<FeedMessage>> {
            match self.steps.pop_front() {
                Some(Step::Message(queue, payload)) => Ok(Some(FeedMessage {
                    queue: queue.to_string(),
                    payload: payload.to_string(),
                })),
                Some(Step::Drop) => Err(Error::ConnectionLost {
                    endpoint: "mock".to_string(),
                    reason: "reset".to_string(),
                }),
                Some(Step::Garbage) => Err(Error::Feed("bad frame".to_string())),
                Some(Step::FailConnect) | None => {
                    let _ = self.done.send(true);
                    Ok(None)
                }
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FeedHandler for Recorder {
        async fn handle(&self, message: &FeedMessage) -> Result<()> {
            if message.payload == "boom" {
                return Err(Error::Feed("handler rejected".to_string()));
            }
            self.seen.lock().unwrap().push(message.payload.clone());
            Ok(())
        }
    }

    fn consumer(steps: Vec<Step>) -> (FeedConsumer<MockFeed>, Arc<Mutex<MockLog>>, watch::Receiver<bool>) {
        let (done, shutdown) = watch::channel(false);
        let log = Arc::new(Mutex::new(MockLog::default()));
        let feed = MockFeed {
            steps: steps.into(),
            log: Arc::clone(&log),
            done,
        };
        (FeedConsumer::new(feed, Duration::from_millis(5)), log, shutdown)
    }

    #[tokio::test]
    async fn test_delivers_to_registered_handlers() {
        let (mut consumer, log, shutdown) = consumer(vec![
            Step::Message("results", "a"),
            Step::Message("results", "boom"),
            Step::Message("unknown", "x"),
            Step::Garbage,
            Step::Message("results", "b"),
        ]);
        let recorder = Arc::new(Recorder::default());
        consumer.register("results", recorder.clone());

        let stats = consumer.run(shutdown).await.unwrap();

        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(log.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn test_reconnects_and_replays_registrations() {
        let (mut consumer, log, shutdown) = consumer(vec![
            Step::FailConnect,
            Step::Message("results", "a"),
            Step::Drop,
            Step::Message("audit", "b"),
        ]);
        let recorder = Arc::new(Recorder::default());
        consumer
            .register("results", recorder.clone())
            .register("audit", recorder.clone());

        let stats = consumer.run(shutdown).await.unwrap();

        assert_eq!(stats.reconnects, 2);
        assert_eq!(stats.delivered, 2);
        let log = log.lock().unwrap();
        assert_eq!(log.connects, 2);
        assert_eq!(log.subscriptions, vec!["audit", "results", "audit", "results"]);
    }

    #[tokio::test]
    async fn test_stops_immediately_when_already_shut_down() {
        let (mut consumer, log, _) = consumer(vec![Step::Message("results", "a")]);
        let (tx, rx) = watch::channel(true);

        let stats = consumer.run(rx).await.unwrap();
        drop(tx);

        assert_eq!(stats, FeedStats::default());
        assert_eq!(log.lock().unwrap().connects, 0);
    }
}
