//! Job status and terminal outcomes

use serde::{Deserialize, Serialize};

/// Status of a job
///
/// `Canceled`, `Succeeded` and `Failed` end a run attempt. Only `Canceled`
/// is final by itself; a failure with retries left, or any outcome of a
/// repeating job, sends the job back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Canceled,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// True for the statuses that end a run attempt
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Canceled | Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Running => write!(f, "Running"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// How a job's whole retry/repeat lifecycle ended
///
/// Resolved exactly once through the job's completion future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub status_text: String,
    /// Number of run attempts made
    pub attempts: u32,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}
