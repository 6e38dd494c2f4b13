//! Job identity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of a submitted job
///
/// Display names are not required to be unique, so the queue tracks jobs by
/// this id. UUID v7 keeps ids sortable by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First eight hex characters, for compact log output
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
