//! Job status notification stream
//!
//! Every status transition of every job is published on an [`EventBus`]
//! (a tokio broadcast channel). Display and logging collaborators subscribe
//! and see each transition in emission order.
//!
//! ```text
//!   Job state machine ──emit──▶ EventBus ──▶ StatusLog (ring buffer)
//!                                   │
//!                                   ├──────▶ CLI printer
//!                                   └──────▶ any other subscriber
//! ```

mod bus;
mod log;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use log::{DEFAULT_STATUS_LOG_CAPACITY, StatusLog};
pub use types::{JobEvent, StatusRecord};
