//! Scheduling harness
//!
//! Drives the periodic work of the engine. Each job has its own fixed
//! interval and its own `Idle → Running → Idle` slot, so a slow allocation run
//! never delays categorization and a job can never overlap itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── Harness ────────────────────────┐
//! │                                                         │
//! │  ingestion ──┐  categorization ──┐  allocation ──┐ ...  │
//! │   interval   │     interval      │    interval   │      │
//! │   JobSlot ◄──┘     JobSlot ◄─────┘    JobSlot ◄──┘      │
//! │                                                         │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │ SIGINT / SIGTERM
//!                            ▼
//!                stop timers, await in-flight runs
//! ```
//!
//! # Modules
//!
//! - [`job`] - per-job state and the run guard
//! - [`harness`] - interval loops, skip-on-overlap, graceful shutdown
//! - [`tasks`] - the engine jobs wired into the harness
//! - [`error`] - scheduler error types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use roundsmith::scheduler::{wait_for_signal, CategorizationTask, Harness};
//!
//! let mut harness = Harness::new();
//! harness.add_job(Arc::new(CategorizationTask::new(categorizer, regions)), Duration::from_secs(30))?;
//!
//! let reports = harness
//!     .run_until(async {
//!         let _ = wait_for_signal().await;
//!     })
//!     .await?;
//! ```

pub mod error;
pub mod harness;
pub mod job;
pub mod tasks;

pub use error::{SchedulerError, SchedulerResult};
pub use harness::{wait_for_signal, Harness, JobReport, ScheduledJob, ShutdownTrigger};
pub use job::{JobGuard, JobSlot, JobState};
pub use tasks::{AllocationTask, CategorizationTask, CleanupTask, IngestionTask};
