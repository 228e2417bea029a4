//! roundsmith - virtual sports round synthesis
//!
//! Turns provider match files into published rounds whose results reproduce a
//! historical score distribution.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`taxonomy`] - Outcome classes and bin key rendering
//! - [`models`] - Candidate keys, payloads and round selections
//! - [`template`] - Distribution templates, strategies and quota rescaling
//! - [`store`] - Sorted-set category store (Redis, in-memory)
//! - [`storage`] - SQLite usage ledger, templates and slot cursors
//! - [`ingest`] - Worker pool that loads provider files into the store
//! - [`engine`] - Categorizer, allocator, publisher and cleaner
//! - [`feed`] - Result feed consumer that keeps templates current
//! - [`scheduler`] - Interval harness with per-job run guards
//! - [`metrics`] - Prometheus counters and gauges
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use roundsmith::prelude::*;
//! use roundsmith::store::MemoryCategoryStore;
//! use roundsmith::storage::SqliteUsageLedger;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = MemoryCategoryStore::shared();
//!     let ledger = Arc::new(SqliteUsageLedger::in_memory()?);
//!     let categorizer = Categorizer::new(
//!         store,
//!         ledger,
//!         Taxonomy::new(&config.store.set_name),
//!         config.categorization.clone(),
//!     );
//!     let report = categorizer.run("EN").await?;
//!     println!("classified {}", report.classified);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod taxonomy;
pub mod template;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{Allocator, Categorizer, Cleaner, RoundPublisher, StorePublisher};
    pub use crate::error::{Error, ErrorCategory, Result, RoundsmithErrorTrait};
    pub use crate::models::{CandidateKey, RoundEntry, RoundSelection, WinningOutcome};
    pub use crate::store::{CategoryStore, SharedCategoryStore};
    pub use crate::taxonomy::{bins_for, Category, Outcome, Taxonomy};
    pub use crate::template::{AllocationStrategy, DistributionTemplate};
}

// Direct re-exports for convenience
pub use models::{CandidateKey, RoundSelection};
pub use taxonomy::{bins_for, Category, Outcome, Taxonomy};
