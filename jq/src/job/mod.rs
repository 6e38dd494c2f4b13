//! Jobs: one handler plus its retry/repeat/cancel state machine
//!
//! A [`JobHandle`] is the shared, cloneable view of a job that callers,
//! display code and the handler itself hold. The state machine that mutates
//! the job lives in the queue actor and is private to the crate.

mod core;
mod handle;
mod handler;
mod options;

pub(crate) use self::core::{Job, RunOutcome};
pub use handle::{JobHandle, JobState};
pub use handler::{HandlerError, HandlerResult, JobHandler};
pub use options::JobOptions;
