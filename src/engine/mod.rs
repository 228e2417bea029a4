//! Categorization and quota-allocation engine
//!
//! - [`categorizer`] files staged candidates into outcome bins
//! - [`allocator`] assembles rounds from the bins against a template
//! - [`publisher`] hands finished rounds to the presentation layer
//! - [`cleaner`] keeps the ledger and the auxiliary bins bounded
//! - [`report`] summarizes bin populations

pub mod allocator;
pub mod categorizer;
pub mod cleaner;
pub mod publisher;
pub mod report;

pub use allocator::Allocator;
pub use categorizer::{CategorizationReport, Categorizer};
pub use cleaner::{Cleaner, CleanupReport};
pub use publisher::{round_key, RoundPublisher, StorePublisher};
pub use report::{bin_report, BinCount, BinReport};
