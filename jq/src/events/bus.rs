//! Event Bus - broadcast of job status transitions

use tokio::sync::broadcast;
use tracing::debug;

use super::types::JobEvent;
use crate::domain::JobStatus;
use crate::job::JobHandle;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Central bus for job status notifications
///
/// Jobs emit through an [`EventEmitter`]; consumers call [`EventBus::subscribe`].
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: JobEvent) {
        debug!(job = %event.job.display_name(), status = %event.status, "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Handle that emits onto this bus without owning it
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter { tx: self.tx.clone() }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap, cloneable sending side of the bus, held by each job
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<JobEvent>,
}

impl EventEmitter {
    /// Emit a raw event
    pub fn emit(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a status transition for `job`
    pub fn status_changed(
        &self,
        job: &JobHandle,
        previous: Option<JobStatus>,
        status: JobStatus,
        status_text: &str,
    ) {
        debug!(
            job = %job.display_name(),
            id = %job.id().short(),
            ?previous,
            %status,
            %status_text,
            "EventEmitter::status_changed"
        );
        self.emit(JobEvent::new(job.clone(), previous, status, status_text));
    }

    /// Emit the transient Failed notification for an attempt that will run again
    pub fn attempt_failed(&self, job: &JobHandle, message: &str) {
        debug!(job = %job.display_name(), id = %job.id().short(), %message, "EventEmitter::attempt_failed");
        self.emit(JobEvent::attempt_failed(job.clone(), message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobHandle, JobOptions};
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_emitter_reaches_every_subscriber_in_order() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let emitter = bus.emitter();
        let job = JobHandle::detached("ping", &JobOptions::default());

        emitter.status_changed(&job, None, JobStatus::Queued, "Queued");
        emitter.status_changed(&job, Some(JobStatus::Queued), JobStatus::Running, "Running");

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.previous, None);
            assert_eq!(first.status, JobStatus::Queued);
            assert_eq!(second.status, JobStatus::Running);
            assert_eq!(second.job, job);
            assert!(!second.transient);
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
    }

    #[tokio::test]
    async fn test_attempt_failed_is_transient() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let job = JobHandle::detached("ping", &JobOptions::default());

        bus.emitter().attempt_failed(&job, "device busy");

        let event = rx.recv().await.unwrap();
        assert!(event.transient);
        assert_eq!(event.previous, Some(JobStatus::Running));
        assert_eq!(event.status, JobStatus::Failed);
        assert_eq!(event.status_text, "device busy");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::default();
        let job = JobHandle::detached("ping", &JobOptions::default());
        bus.emitter().status_changed(&job, None, JobStatus::Queued, "Queued");
    }
}
