//! Domain types for the job queue
//!
//! Identity and status vocabulary shared by jobs, the queue actor and the
//! notification stream.

mod id;
mod status;

pub use id::JobId;
pub use status::{JobOutcome, JobStatus};
