//! Per-job run state
//!
//! A [`JobSlot`] is the single source of truth for whether a job is running.
//! [`JobSlot::try_begin`] flips `Idle → Running` and hands back a guard that
//! flips it back on drop, including when the run errors or panics.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Running,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSlot {
    state: Arc<Mutex<JobState>>,
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSlot {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        // The state is a plain enum, a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> JobState {
        *self.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// Claim the slot; `None` while a previous run is still in progress
    pub fn try_begin(&self) -> Option<JobGuard> {
        let mut state = self.lock();
        if *state == JobState::Running {
            return None;
        }
        *state = JobState::Running;
        Some(JobGuard {
            slot: self.clone(),
        })
    }
}

/// Marks a run in progress; the slot returns to `Idle` when dropped
#[derive(Debug)]
pub struct JobGuard {
    slot: JobSlot,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        *self.slot.lock() = JobState::Idle;
    }
}
