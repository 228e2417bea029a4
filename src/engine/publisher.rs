//! Round publication
//!
//! The allocator hands finished rounds to a [`RoundPublisher`]. The default
//! [`StorePublisher`] writes the round as JSON next to the candidate payloads,
//! where the presentation layer picks it up.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RoundSelection;
use crate::store::{CategoryStore, SharedCategoryStore};

#[async_trait]
pub trait RoundPublisher: Send + Sync {
    async fn publish(&self, competition_id: u32, round_slot: u32, round: &RoundSelection) -> Result<()>;
}

/// Key a published round is stored under
pub fn round_key(region: &str, competition_id: u32, round_slot: u32) -> String {
    format!("{region}:ROUND:{competition_id}:{round_slot}")
}

pub struct StorePublisher {
    store: SharedCategoryStore,
    ttl: Duration,
}

impl StorePublisher {
    pub fn new(store: SharedCategoryStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

#[async_trait]
impl RoundPublisher for StorePublisher {
    async fn publish(&self, competition_id: u32, round_slot: u32, round: &RoundSelection) -> Result<()> {
        let key = round_key(&round.region, competition_id, round_slot);
        let payload = serde_json::to_string(round)?;
        self.store.set_with_ttl(&key, &payload, self.ttl).await?;

        tracing::info!(key = %key, matches = round.len(), "Published round");
        Ok(())
    }
}
