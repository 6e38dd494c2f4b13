//! Job queue actor
//!
//! The [`JobQueue`] task exclusively owns the ordered job collection. Every
//! external operation is a message into its inbox, and handler completions
//! and repeat timers post their results back into the same inbox, so the
//! "scan, purge, select, start" scheduling pass never races with itself.
//!
//! Admission control runs two independent lanes, regular and out-of-band,
//! each admitting at most one running job.

mod config;
mod core;
mod handle;
mod messages;
mod view;

pub use self::core::JobQueue;
pub use config::QueueConfig;
pub use handle::QueueHandle;
pub(crate) use messages::QueueRequest;
pub use messages::{QueueError, QueueResult};
pub use view::{JobCell, QueueView};
