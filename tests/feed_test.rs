//! Result feed integration: queued result messages become stored templates
//! that allocation can draw against

mod common;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_test::{assert_err, assert_ok};

use roundsmith::error::{Error, Result};
use roundsmith::feed::{FeedConsumer, FeedMessage, ResultFeed, TemplateIngestHandler};
use roundsmith::storage::{MockUsageLedger, SqliteTemplateRepository, TemplateKind, TemplateRepository};
use roundsmith::store::MemoryCategoryStore;
use roundsmith::template::DistributionTemplate;

use common::{create_test_allocator, file, REGION};

/// Feed backed by an in-process channel; a `None` entry simulates a dropped connection
struct ChannelFeed {
    rx: mpsc::UnboundedReceiver<Option<FeedMessage>>,
    pending: VecDeque<FeedMessage>,
    subscribed: Vec<String>,
}

#[async_trait]
impl ResultFeed for ChannelFeed {
    fn endpoint(&self) -> &str {
        "channel"
    }

    async fn connect(&mut self) -> Result<()> {
        self.subscribed.clear();
        Ok(())
    }

    async fn subscribe(&mut self, queue: &str) -> Result<()> {
        self.subscribed.push(queue.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<FeedMessage>> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        match tokio::time::timeout(Duration::from_millis(20), self.rx.recv()).await {
            Ok(Some(Some(message))) if self.subscribed.contains(&message.queue) => Ok(Some(message)),
            Ok(Some(Some(message))) => {
                self.pending.push_back(message);
                Ok(None)
            }
            Ok(Some(None)) => Err(Error::ConnectionLost {
                endpoint: "channel".to_string(),
                reason: "dropped".to_string(),
            }),
            Ok(None) | Err(_) => Ok(None),
        }
    }
}

fn result_message(competition: u32, slot: u32, scores: &[(u64, u32, u32)]) -> FeedMessage {
    let results: Vec<_> = scores
        .iter()
        .map(|(id, home, away)| serde_json::json!({ "matchId": id, "homeGoals": home, "awayGoals": away }))
        .collect();
    FeedMessage {
        queue: "results".to_string(),
        payload: serde_json::json!({
            "competitionId": competition,
            "roundSlot": slot,
            "results": results,
        })
        .to_string(),
    }
}

async fn wait_for_slot(repo: &SqliteTemplateRepository, competition: u32, slot: u32) {
    for _ in 0..200 {
        if repo.get(competition, slot).unwrap().is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("template {competition}/{slot} never arrived");
}

#[tokio::test]
async fn test_feed_templates_survive_reconnect_and_drive_allocation() {
    let repo = Arc::new(SqliteTemplateRepository::in_memory().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let feed = ChannelFeed {
        rx,
        pending: VecDeque::new(),
        subscribed: Vec::new(),
    };
    let mut consumer = FeedConsumer::new(feed, Duration::from_millis(10));
    consumer.register("results", Arc::new(TemplateIngestHandler::new(repo.clone())));
    let consumer = tokio::spawn(async move { consumer.run(stop_rx).await });

    tx.send(Some(result_message(4, 1, &[(1, 0, 0), (2, 1, 0)]))).unwrap();
    wait_for_slot(&repo, 4, 1).await;

    // Drop the connection, then keep publishing
    tx.send(None).unwrap();
    tx.send(Some(FeedMessage {
        queue: "results".to_string(),
        payload: "{not json".to_string(),
    }))
    .unwrap();
    tx.send(Some(result_message(4, 2, &[(3, 2, 2), (4, 0, 1)]))).unwrap();
    wait_for_slot(&repo, 4, 2).await;

    stop_tx.send(true).unwrap();
    let stats = assert_ok!(consumer.await.unwrap());
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.reconnects, 1);

    let row = repo.get(4, 2).unwrap().unwrap();
    assert_eq!(row.kind, TemplateKind::Raw);
    assert_eq!(row.payload, "3#2#2,4#0#1");
    assert_eq!(repo.slots_for(4).unwrap(), vec![1, 2]);

    // The stored template drives an exact-score allocation of two matches
    let store = MemoryCategoryStore::shared();
    file(&store, 50, 2, 2).await;
    file(&store, 51, 0, 1).await;
    let allocator = create_test_allocator(store, Arc::new(MockUsageLedger::new()));
    let template = DistributionTemplate::from_row(&row).unwrap();
    let round = assert_ok!(allocator.allocate(REGION, 2, &template).await);
    assert_eq!(round.len(), 2);

    // Nothing left for a second draw
    assert_err!(allocator.allocate(REGION, 2, &template).await);
}
