//! QueueView - lane-grouped display snapshot

use std::fmt;

use serde::Serialize;

use crate::domain::{JobId, JobStatus};
use crate::job::JobHandle;

/// One rendered job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobCell {
    pub id: JobId,
    pub display_name: String,
    pub status: JobStatus,
    pub status_text: String,
}

impl From<&JobHandle> for JobCell {
    fn from(job: &JobHandle) -> Self {
        let state = job.state();
        Self {
            id: job.id(),
            display_name: job.display_name().to_string(),
            status: state.status,
            status_text: state.status_text,
        }
    }
}

impl fmt::Display for JobCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.display_name, self.status_text)
    }
}

/// Snapshot of the queue split by lane, oldest first within each
///
/// Out-of-band jobs render one per row above a single row holding every
/// regular job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueView {
    pub out_of_band: Vec<JobCell>,
    pub regular: Vec<JobCell>,
}

impl QueueView {
    pub fn from_jobs(jobs: &[JobHandle]) -> Self {
        let (out_of_band, regular): (Vec<_>, Vec<_>) = jobs.iter().partition(|job| job.out_of_band());
        Self {
            out_of_band: out_of_band.into_iter().map(JobCell::from).collect(),
            regular: regular.into_iter().map(JobCell::from).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.out_of_band.is_empty() && self.regular.is_empty()
    }

    pub fn len(&self) -> usize {
        self.out_of_band.len() + self.regular.len()
    }

    /// Display rows: each out-of-band cell alone, then the regular cells together
    pub fn rows(&self) -> Vec<Vec<&JobCell>> {
        let mut rows: Vec<Vec<&JobCell>> = self.out_of_band.iter().map(|cell| vec![cell]).collect();
        if !self.regular.is_empty() {
            rows.push(self.regular.iter().collect());
        }
        rows
    }
}

impl fmt::Display for QueueView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(no jobs)");
        }
        let rows = self.rows();
        for (index, row) in rows.iter().enumerate() {
            let cells: Vec<String> = row.iter().map(|cell| format!("[{}]", cell)).collect();
            write!(f, "{}", cells.join(" "))?;
            if index + 1 < rows.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
