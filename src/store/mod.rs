//! Category store abstraction
//!
//! Bins are priority sets keyed by member (lowest priority first) and
//! payloads are plain string values with a TTL. Production runs against Redis
//! sorted sets and `SETEX` keys ([`RedisCategoryStore`]); tests and the
//! one-shot CLI commands can use [`MemoryCategoryStore`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use roundsmith::store::{CategoryStore, MemoryCategoryStore};
//!
//! let store = MemoryCategoryStore::new();
//! store.add_to_bin("EN:STAGING", 1.0, "EN:4711").await?;
//! let oldest = store.range_bin("EN:STAGING", 10).await?;
//! ```

pub mod redis;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Error, Result};

pub use self::redis::RedisCategoryStore;

/// Shared handle used by every engine component
pub type SharedCategoryStore = Arc<dyn CategoryStore>;

/// Priority for a member inserted now: unix time in milliseconds
pub fn now_priority() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Insert or re-prioritize a member; returns true when it was new
    async fn add_to_bin(&self, bin: &str, priority: f64, member: &str) -> Result<bool>;

    /// Up to `limit` members, lowest priority first
    async fn range_bin(&self, bin: &str, limit: usize) -> Result<Vec<String>>;

    /// Remove a member; returns true when it was present
    async fn remove_from_bin(&self, bin: &str, member: &str) -> Result<bool>;

    /// Remove a member from several bins, returning how many bins held it
    async fn remove_from_bins(&self, bins: &[String], member: &str) -> Result<usize> {
        let mut removed = 0;
        for bin in bins {
            if self.remove_from_bin(bin, member).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn contains(&self, bin: &str, member: &str) -> Result<bool>;

    async fn bin_size(&self, bin: &str) -> Result<usize>;

    /// Drop the oldest members until at most `keep` remain; returns the number dropped
    async fn trim_oldest(&self, bin: &str, keep: usize) -> Result<usize>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Default)]
struct MemoryState {
    bins: HashMap<String, HashMap<String, f64>>,
    values: HashMap<String, (String, Option<Instant>)>,
}

/// In-process store with the same ordering and expiry semantics as Redis
#[derive(Default)]
pub struct MemoryCategoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Expire a payload immediately
    pub fn expire(&self, key: &str) {
        if let Ok(mut state) = self.state.write() {
            state.values.remove(key);
        }
    }

    /// Names of every non-empty bin
    pub fn bin_names(&self) -> Vec<String> {
        self.state
            .read()
            .map(|state| {
                let mut names: Vec<String> = state
                    .bins
                    .iter()
                    .filter(|(_, members)| !members.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect();
                names.sort();
                names
            })
            .unwrap_or_default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| Error::Store(format!("memory store lock poisoned: {e}")))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| Error::Store(format!("memory store lock poisoned: {e}")))
    }

    fn ordered(members: &HashMap<String, f64>) -> Vec<(&String, f64)> {
        let mut ordered: Vec<(&String, f64)> = members.iter().map(|(m, p)| (m, *p)).collect();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ordered
    }
}

#[async_trait]
impl CategoryStore for MemoryCategoryStore {
    async fn add_to_bin(&self, bin: &str, priority: f64, member: &str) -> Result<bool> {
        let mut state = self.write()?;
        Ok(state
            .bins
            .entry(bin.to_string())
            .or_default()
            .insert(member.to_string(), priority)
            .is_none())
    }

    async fn range_bin(&self, bin: &str, limit: usize) -> Result<Vec<String>> {
        let state = self.read()?;
        Ok(state
            .bins
            .get(bin)
            .map(|members| {
                Self::ordered(members)
                    .into_iter()
                    .take(limit)
                    .map(|(m, _)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_from_bin(&self, bin: &str, member: &str) -> Result<bool> {
        let mut state = self.write()?;
        Ok(state
            .bins
            .get_mut(bin)
            .map(|members| members.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn contains(&self, bin: &str, member: &str) -> Result<bool> {
        let state = self.read()?;
        Ok(state
            .bins
            .get(bin)
            .is_some_and(|members| members.contains_key(member)))
    }

    async fn bin_size(&self, bin: &str) -> Result<usize> {
        let state = self.read()?;
        Ok(state.bins.get(bin).map_or(0, HashMap::len))
    }

    async fn trim_oldest(&self, bin: &str, keep: usize) -> Result<usize> {
        let mut state = self.write()?;
        let Some(members) = state.bins.get_mut(bin) else {
            return Ok(0);
        };
        if members.len() <= keep {
            return Ok(0);
        }

        let excess = members.len() - keep;
        let doomed: Vec<String> = Self::ordered(members)
            .into_iter()
            .take(excess)
            .map(|(m, _)| m.clone())
            .collect();
        for member in &doomed {
            members.remove(member);
        }
        Ok(doomed.len())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        {
            let state = self.read()?;
            match state.values.get(key) {
                None => return Ok(None),
                Some((_, Some(at))) if *at <= Instant::now() => {}
                Some((value, _)) => return Ok(Some(value.clone())),
            }
        }

        self.write()?.values.remove(key);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(ttl);
        self.write()?
            .values
            .insert(key.to_string(), (payload.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.write()?.values.remove(key).is_some())
    }
}
