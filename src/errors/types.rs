//! Error type definitions for the cron-fleet service
//!
//! The taxonomy separates malformed caller input, expected contention and
//! timing outcomes, infrastructure failures, and callback failures so callers
//! can decide what to retry, what to skip, and what to surface.

use thiserror::Error;

/// All errors the core operations can produce.
///
/// `AlreadyLocked` and `TooEarly` are expected contention/timing outcomes:
/// callers should skip the job and move on rather than retry in a tight loop.
/// `StoreUnavailable` is the only retryable variant.
#[derive(Error, Debug)]
pub enum CronError {
    /// Malformed caller input; surfaced immediately, never retried
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// The referenced job could not be resolved
    #[error("job not found: {identity}")]
    JobNotFound { identity: String },

    /// Another runner holds a non-expired lock on the job
    #[error("job {job_id} is locked by another runner")]
    AlreadyLocked { job_id: i64 },

    /// The job's scheduled time is still in the future
    #[error("job is not due until {timestamp}")]
    TooEarly { timestamp: i64 },

    /// Storage-layer failure; retryable by the caller with backoff
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// The job's callback raised an error; recorded on the record as
    /// `failed` and surfaced in the run result
    #[error("callback for '{action}' failed: {message}")]
    CallbackFailure { action: String, message: String },
}

impl CronError {
    /// Create an invalid query error with a custom message
    pub fn invalid_query<S: Into<String>>(message: S) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a not found error for a job identity
    pub fn job_not_found<S: Into<String>>(identity: S) -> Self {
        Self::JobNotFound {
            identity: identity.into(),
        }
    }

    /// Create a callback failure error
    pub fn callback_failure<A: Into<String>, M: Into<String>>(action: A, message: M) -> Self {
        Self::CallbackFailure {
            action: action.into(),
            message: message.into(),
        }
    }
}
