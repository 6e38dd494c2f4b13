//! Per-job submission options

use std::time::Duration;

/// Submission options for a job
///
/// Defaults: regular lane, one permitted attempt, no repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Run in the out-of-band lane
    pub out_of_band: bool,

    /// Total permitted attempts, counting the first run
    ///
    /// Zero behaves like one: the job still runs once. Repeating jobs ignore
    /// the budget entirely.
    pub retry_count: u32,

    /// Zero runs the job to a single terminal outcome. Non-zero re-runs it
    /// this long after every success, and immediately after every failure,
    /// until canceled.
    pub repeat_delay: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            out_of_band: false,
            retry_count: 1,
            repeat_delay: Duration::ZERO,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an out-of-band job
    pub fn out_of_band() -> Self {
        Self {
            out_of_band: true,
            ..Self::default()
        }
    }

    pub fn with_out_of_band(mut self, out_of_band: bool) -> Self {
        self.out_of_band = out_of_band;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn repeat_every(mut self, delay: Duration) -> Self {
        self.repeat_delay = delay;
        self
    }

    pub fn repeats(&self) -> bool {
        !self.repeat_delay.is_zero()
    }
}
