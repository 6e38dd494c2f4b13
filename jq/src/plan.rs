//! Job plans - simulated workloads described in YAML
//!
//! A plan is a list of jobs to submit in order. Each one sleeps for its
//! duration (observing cancellation) and fails its first `fail-times`
//! attempts, which is enough to exercise retry, repeat, lanes and
//! cancellation end to end.
//!
//! ```yaml
//! - name: heartbeat
//!   out-of-band: true
//!   duration-ms: 20
//!   repeat-delay-ms: 5000
//! - name: upload
//!   duration-ms: 300
//!   fail-times: 1
//!   retry-count: 3
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::job::{HandlerError, HandlerResult, JobHandle, JobHandler, JobOptions};

/// One simulated job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlannedJob {
    pub name: String,

    /// Time each attempt takes
    #[serde(default)]
    pub duration_ms: u64,

    /// Attempts that fail before the job starts succeeding
    #[serde(default)]
    pub fail_times: u32,

    #[serde(default)]
    pub out_of_band: bool,

    /// Total permitted attempts
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Zero for a one-shot job
    #[serde(default)]
    pub repeat_delay_ms: u64,

    /// Cancel the job this long after it was submitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_after_ms: Option<u64>,
}

fn default_retry_count() -> u32 {
    1
}

impl PlannedJob {
    pub fn options(&self) -> JobOptions {
        JobOptions::new()
            .with_out_of_band(self.out_of_band)
            .with_retry_count(self.retry_count)
            .repeat_every(Duration::from_millis(self.repeat_delay_ms))
    }

    pub fn repeats(&self) -> bool {
        self.repeat_delay_ms > 0
    }

    pub fn handler(&self) -> SimulatedJob {
        SimulatedJob::new(Duration::from_millis(self.duration_ms), self.fail_times)
    }

    /// Single-line summary for listings
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("{}ms", self.duration_ms)];
        if self.out_of_band {
            parts.push("out-of-band".to_string());
        }
        if self.retry_count > 1 {
            parts.push(format!("{} attempts", self.retry_count));
        }
        if self.fail_times > 0 {
            parts.push(format!("fails {}x", self.fail_times));
        }
        if self.repeats() {
            parts.push(format!("repeats every {}ms", self.repeat_delay_ms));
        }
        if let Some(ms) = self.cancel_after_ms {
            parts.push(format!("canceled after {}ms", ms));
        }
        format!("{} ({})", self.name, parts.join(", "))
    }
}

/// Ordered list of jobs to submit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPlan {
    pub jobs: Vec<PlannedJob>,
}

impl JobPlan {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "JobPlan::load: called");
        let content = fs::read_to_string(path).context(format!("Failed to read plan {}", path.display()))?;
        Self::parse(&content).context(format!("Invalid plan {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(content).context("Failed to parse plan")?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(eyre!("Plan has no jobs"));
        }

        let mut seen = HashSet::new();
        for (index, job) in self.jobs.iter().enumerate() {
            if job.name.trim().is_empty() {
                return Err(eyre!("Job #{} has an empty name", index + 1));
            }
            // Display names need not be unique, but the run output keys on them
            if !seen.insert(job.name.as_str()) {
                return Err(eyre!("Duplicate job name '{}'", job.name));
            }
        }
        Ok(())
    }

    pub fn has_repeating(&self) -> bool {
        self.jobs.iter().any(PlannedJob::repeats)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Handler that sleeps, then fails its first `fail_times` attempts
pub struct SimulatedJob {
    duration: Duration,
    fail_times: u32,
    attempts: AtomicU32,
}

impl SimulatedJob {
    pub fn new(duration: Duration, fail_times: u32) -> Self {
        Self {
            duration,
            fail_times,
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for SimulatedJob {
    async fn run(&self, job: JobHandle) -> HandlerResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(job = %job.display_name(), attempt, "SimulatedJob::run: called");

        job.check_cancelled()?;
        job.sleep(self.duration).await?;

        if attempt <= self.fail_times {
            return Err(HandlerError::failed(format!(
                "simulated failure {} of {}",
                attempt, self.fail_times
            )));
        }
        Ok(())
    }
}
