//! Status Log - bounded in-memory history of job notifications
//!
//! The StatusLog subscribes to the bus and keeps the most recent
//! [`StatusRecord`]s for dashboards and post-run reports. It is cheap to
//! clone; every clone reads the same ring.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::{JobEvent, StatusRecord};

/// Default number of records kept
pub const DEFAULT_STATUS_LOG_CAPACITY: usize = 500;

#[derive(Clone)]
pub struct StatusLog {
    capacity: usize,
    entries: Arc<RwLock<VecDeque<StatusRecord>>>,
}

impl StatusLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "StatusLog::new: called");
        Self {
            capacity,
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record, evicting the oldest when full
    pub fn push(&self, record: StatusRecord) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// All retained records, oldest first
    pub fn entries(&self) -> Vec<StatusRecord> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// The newest `count` records, oldest first
    pub fn tail(&self, count: usize) -> Vec<StatusRecord> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    /// One line per record
    pub fn as_text(&self) -> String {
        self.entries()
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Consume events until the bus closes
    pub async fn run(self, mut rx: broadcast::Receiver<JobEvent>) {
        debug!("StatusLog::run: starting");
        loop {
            match rx.recv().await {
                Ok(event) => self.push(event.to_record()),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "StatusLog: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("StatusLog: channel closed, shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn [`StatusLog::run`] on a clone of this log
    pub fn spawn(&self, rx: broadcast::Receiver<JobEvent>) -> tokio::task::JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(log.run(rx))
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobStatus};
    use crate::events::EventBus;
    use crate::job::{JobHandle, JobOptions};
    use chrono::Utc;

    fn record(name: &str) -> StatusRecord {
        StatusRecord {
            timestamp: Utc::now(),
            job_id: JobId::new(),
            display_name: name.to_string(),
            out_of_band: false,
            previous: None,
            status: JobStatus::Queued,
            status_text: "Queued".to_string(),
            transient: false,
        }
    }

    fn names(records: &[StatusRecord]) -> Vec<String> {
        records.iter().map(|r| r.display_name.clone()).collect()
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let log = StatusLog::new(3);
        for name in ["a", "b", "c", "d"] {
            log.push(record(name));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(names(&log.entries()), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_tail() {
        let log = StatusLog::new(10);
        for name in ["a", "b", "c"] {
            log.push(record(name));
        }
        assert_eq!(names(&log.tail(2)), vec!["b", "c"]);
        assert_eq!(names(&log.tail(50)), vec!["a", "b", "c"]);
        assert!(log.tail(0).is_empty());
    }

    #[test]
    fn test_clear_and_clones_share_storage() {
        let log = StatusLog::new(10);
        let view = log.clone();
        log.push(record("a"));
        assert_eq!(view.len(), 1);
        view.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_as_text_one_line_per_record() {
        let log = StatusLog::new(10);
        log.push(record("a"));
        log.push(record("b"));
        let text = log.as_text();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("a: - -> Queued"));
    }

    #[tokio::test]
    async fn test_run_records_bus_events_until_closed() {
        let bus = EventBus::new(16);
        let log = StatusLog::new(10);
        let task = log.spawn(bus.subscribe());

        let job = JobHandle::detached("ping", &JobOptions::default());
        let emitter = bus.emitter();
        emitter.status_changed(&job, None, JobStatus::Queued, "Queued");
        emitter.status_changed(&job, Some(JobStatus::Queued), JobStatus::Running, "Running");
        drop(emitter);
        drop(bus);

        task.await.unwrap();
        let statuses: Vec<_> = log.entries().iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![JobStatus::Queued, JobStatus::Running]);
    }
}
