//! Notification payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobStatus};
use crate::job::JobHandle;

/// One status transition of one job
///
/// `previous` is `None` only for the notification emitted when a job is
/// first placed in the queue.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job: JobHandle,
    pub previous: Option<JobStatus>,
    pub status: JobStatus,
    pub status_text: String,
    /// Failed notification for an attempt that will be retried or repeated.
    /// The job's actual status never becomes `Failed`; the next notification
    /// moves it from `Running` to `Queued`.
    pub transient: bool,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job: JobHandle, previous: Option<JobStatus>, status: JobStatus, status_text: impl Into<String>) -> Self {
        Self {
            job,
            previous,
            status,
            status_text: status_text.into(),
            transient: false,
            timestamp: Utc::now(),
        }
    }

    /// Failed notification for a run attempt that will be retried or repeated
    pub fn attempt_failed(job: JobHandle, message: impl Into<String>) -> Self {
        Self {
            transient: true,
            ..Self::new(job, Some(JobStatus::Running), JobStatus::Failed, message)
        }
    }

    /// Serializable form for logs
    pub fn to_record(&self) -> StatusRecord {
        StatusRecord {
            timestamp: self.timestamp,
            job_id: self.job.id(),
            display_name: self.job.display_name().to_string(),
            out_of_band: self.job.out_of_band(),
            previous: self.previous,
            status: self.status,
            status_text: self.status_text.clone(),
            transient: self.transient,
        }
    }
}

/// Flattened, serializable form of a [`JobEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "job-id")]
    pub job_id: JobId,
    #[serde(rename = "display-name")]
    pub display_name: String,
    #[serde(rename = "out-of-band")]
    pub out_of_band: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<JobStatus>,
    pub status: JobStatus,
    #[serde(rename = "status-text")]
    pub status_text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
}

impl std::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let previous = self.previous.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} {}: {} -> {} ({})",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.display_name,
            previous,
            self.status,
            self.status_text
        )?;
        if self.transient {
            write!(f, " [will retry]")?;
        }
        Ok(())
    }
}
