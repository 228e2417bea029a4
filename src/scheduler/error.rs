//! Error types for the scheduling harness

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// A job was registered with a zero or otherwise unusable interval
    InvalidInterval { job: String, secs: u64 },

    /// Two jobs were registered under the same name
    DuplicateJob { job: String },

    /// A job run ended with an error
    JobFailed { job: String, reason: String },

    /// A job task panicked or was aborted
    JobAborted { job: String, reason: String },

    /// Installing the OS signal handler failed
    SignalHandler { reason: String },

    /// Harness is already stopping
    ShuttingDown,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { job, secs } => {
                write!(f, "Invalid interval {}s for job '{}'. Must be positive", secs, job)
            }
            Self::DuplicateJob { job } => {
                write!(f, "Job '{}' is already registered", job)
            }
            Self::JobFailed { job, reason } => {
                write!(f, "Job '{}' failed: {}", job, reason)
            }
            Self::JobAborted { job, reason } => {
                write!(f, "Job '{}' aborted: {}", job, reason)
            }
            Self::SignalHandler { reason } => {
                write!(f, "Failed to install signal handler: {}", reason)
            }
            Self::ShuttingDown => write!(f, "Scheduler is shutting down"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        Self::SignalHandler {
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create an invalid interval error
    pub fn invalid_interval(job: impl Into<String>, secs: u64) -> Self {
        Self::InvalidInterval {
            job: job.into(),
            secs,
        }
    }

    /// Create a duplicate job error
    pub fn duplicate_job(job: impl Into<String>) -> Self {
        Self::DuplicateJob { job: job.into() }
    }

    /// Create a job failure error
    pub fn job_failed(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Create a job aborted error
    pub fn job_aborted(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobAborted {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::JobFailed { .. } | Self::JobAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_interval_error() {
        let err = SchedulerError::invalid_interval("categorize", 0);
        assert!(err.to_string().contains("categorize"));
        assert!(err.to_string().contains("0s"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SchedulerError::job_failed("allocate", "Not enough data").is_recoverable());
        assert!(!SchedulerError::duplicate_job("allocate").is_recoverable());
        assert!(!SchedulerError::ShuttingDown.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no signals here");
        let err: SchedulerError = io.into();
        assert!(matches!(err, SchedulerError::SignalHandler { .. }));
    }
}
