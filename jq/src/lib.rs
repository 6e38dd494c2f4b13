//! jobqueue - two-lane job queue for a single managed device
//!
//! Serializes, retries and prioritizes asynchronous operations aimed at one
//! endpoint. Jobs run one at a time in each of two lanes: the regular lane
//! and an out-of-band lane for urgent or housekeeping work such as a device
//! heartbeat.
//!
//! # Core Concepts
//!
//! - **Single owner**: the [`JobQueue`] actor owns every job; callers hold
//!   cloneable [`QueueHandle`]s and [`JobHandle`]s
//! - **Event-driven scheduling**: every status change triggers a
//!   scheduling pass, and a pass with nothing to do starts nothing
//! - **Bounded retry, indefinite repeat**: `retry_count` counts total
//!   attempts; a non-zero `repeat_delay` re-runs the job until canceled
//! - **Cooperative cancellation**: handlers observe their job's
//!   cancellation signal through the [`JobHandle`] they are given
//!
//! # Modules
//!
//! - [`domain`] - identifiers and status vocabulary
//! - [`job`] - handler trait, options and job handles
//! - [`queue`] - the actor, its client handle and display view
//! - [`events`] - status notification stream and status log
//! - [`config`] - configuration types and loading
//! - [`cli`], [`plan`] - command-line surface and simulated job plans

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod job;
pub mod plan;
pub mod queue;

// Re-export commonly used types
pub use config::{Config, StatusLogConfig};
pub use domain::{JobId, JobOutcome, JobStatus};
pub use events::{EventBus, JobEvent, StatusLog, StatusRecord};
pub use job::{HandlerError, HandlerResult, JobHandle, JobHandler, JobOptions, JobState};
pub use plan::{JobPlan, PlannedJob, SimulatedJob};
pub use queue::{JobCell, JobQueue, QueueConfig, QueueError, QueueHandle, QueueResult, QueueView};
