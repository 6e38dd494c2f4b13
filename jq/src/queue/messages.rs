//! Queue actor messages
//!
//! Requests and replies for the actor pattern.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::JobId;
use crate::job::{JobHandle, JobHandler, JobOptions, RunOutcome};

/// Errors from queue operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,
}

/// Response from queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Requests processed by the queue actor
pub(crate) enum QueueRequest {
    /// Submit a new job
    Submit {
        display_name: String,
        handler: Arc<dyn JobHandler>,
        options: JobOptions,
        reply: oneshot::Sender<QueueResult<JobHandle>>,
    },

    /// Oldest-first snapshot of tracked jobs
    Jobs { reply: oneshot::Sender<Vec<JobHandle>> },

    /// Raise cancellation on one job if it is still tracked
    Cancel { id: JobId, reply: oneshot::Sender<bool> },

    /// Raise cancellation on every tracked job
    CancelAll { reply: oneshot::Sender<usize> },

    /// Run a scheduling pass without any state change
    Reschedule { reply: oneshot::Sender<Option<JobId>> },

    /// A handler attempt settled (internal)
    Settled {
        id: JobId,
        attempt: u32,
        outcome: RunOutcome,
    },

    /// A repeat wait ended (internal)
    RepeatElapsed { id: JobId, canceled: bool },

    /// Cancel everything, drain, and stop the actor
    Shutdown { reply: oneshot::Sender<()> },
}

impl QueueRequest {
    /// Name for logging
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "Submit",
            Self::Jobs { .. } => "Jobs",
            Self::Cancel { .. } => "Cancel",
            Self::CancelAll { .. } => "CancelAll",
            Self::Reschedule { .. } => "Reschedule",
            Self::Settled { .. } => "Settled",
            Self::RepeatElapsed { .. } => "RepeatElapsed",
            Self::Shutdown { .. } => "Shutdown",
        }
    }
}
