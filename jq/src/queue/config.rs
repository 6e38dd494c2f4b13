//! Queue configuration

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Queue actor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of the actor's request inbox
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Capacity of the status notification broadcast channel
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    256
}

fn default_event_capacity() -> usize {
    debug!("default_event_capacity: called");
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
            event_capacity: default_event_capacity(),
        }
    }
}
