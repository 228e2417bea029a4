//! Relational persistence
//!
//! SQLite holds the usage ledger (cooldown enforcement and category audit),
//! the distribution templates and the allocation slot cursors. Each concern
//! sits behind a repository trait with a SQLite and a mock implementation.

pub mod ledger;
pub mod templates;

pub use ledger::{CategoryAudit, MockUsageLedger, SharedUsageLedger, SqliteUsageLedger, UsageLedger};
pub use templates::{
    MockTemplateRepository, SharedTemplateRepository, SqliteTemplateRepository, TemplateKind,
    TemplateRepository, TemplateRow,
};
