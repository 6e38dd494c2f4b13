//! QueueHandle - client interface to the queue actor

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::messages::{QueueError, QueueRequest, QueueResult};
use crate::domain::JobId;
use crate::events::{EventBus, JobEvent};
use crate::job::{JobHandle, JobHandler, JobOptions};

/// Handle for submitting and controlling jobs
///
/// Cloneable; every clone talks to the same actor. All operations fail with
/// [`QueueError::Closed`] once the actor has stopped.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<QueueRequest>,
    bus: Arc<EventBus>,
}

impl QueueHandle {
    pub(crate) fn new(tx: mpsc::Sender<QueueRequest>, bus: Arc<EventBus>) -> Self {
        debug!("QueueHandle::new: called");
        Self { tx, bus }
    }

    /// Create a job and append it to the tail of the queue
    ///
    /// The job is announced as `Queued` and a scheduling pass runs before
    /// this returns, so the job may already be `Running`.
    pub async fn queue_job(
        &self,
        display_name: impl Into<String>,
        handler: impl JobHandler,
        options: JobOptions,
    ) -> QueueResult<JobHandle> {
        let display_name = display_name.into();
        debug!(%display_name, ?options, "QueueHandle::queue_job: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::Submit {
            display_name,
            handler: Arc::new(handler),
            options,
            reply,
        })
        .await?;
        rx.await.map_err(|_| QueueError::Closed)?
    }

    /// Oldest-first snapshot of the jobs currently tracked
    ///
    /// Jobs that reached a terminal status are purged by the next scheduling
    /// pass, so the snapshot never holds one.
    pub async fn jobs(&self) -> QueueResult<Vec<JobHandle>> {
        debug!("QueueHandle::jobs: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::Jobs { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Raise the cancellation signal of a tracked job
    ///
    /// Returns false if the job is no longer tracked. The status changes
    /// only when the running attempt or repeat wait observes the signal.
    pub async fn cancel_job(&self, job: &JobHandle) -> QueueResult<bool> {
        debug!(job = %job.display_name(), "QueueHandle::cancel_job: called");
        self.cancel_id(job.id()).await
    }

    pub async fn cancel_id(&self, id: JobId) -> QueueResult<bool> {
        debug!(%id, "QueueHandle::cancel_id: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::Cancel { id, reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Raise the cancellation signal of every tracked job
    ///
    /// Returns how many jobs were signalled. Queued jobs still start and
    /// observe the signal through their handler.
    pub async fn cancel_all_jobs(&self) -> QueueResult<usize> {
        debug!("QueueHandle::cancel_all_jobs: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::CancelAll { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Run one scheduling pass and return the job it started, if any
    pub async fn reschedule(&self) -> QueueResult<Option<JobId>> {
        debug!("QueueHandle::reschedule: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::Reschedule { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Subscribe to status change notifications
    ///
    /// Only notifications emitted after subscribing are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        debug!("QueueHandle::subscribe: called");
        self.bus.subscribe()
    }

    /// Cancel every job, wait until they have all finished, then stop the actor
    ///
    /// Queued jobs end as `Canceled` without running. Submissions made
    /// during shutdown are rejected.
    pub async fn shutdown(&self) -> QueueResult<()> {
        debug!("QueueHandle::shutdown: called");
        let (reply, rx) = oneshot::channel();
        self.send(QueueRequest::Shutdown { reply }).await?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, request: QueueRequest) -> QueueResult<()> {
        self.tx.send(request).await.map_err(|_| {
            debug!("QueueHandle::send: channel closed");
            QueueError::Closed
        })
    }
}
