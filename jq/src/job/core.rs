//! Job state machine
//!
//! Owned exclusively by the queue actor. Handler attempts and repeat waits
//! run on spawned tasks that report back through the actor's inbox, so every
//! status change happens on the actor task. The actor only keeps a weak
//! sender; each spawned task holds a strong one while it is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::handle::{JobHandle, JobState};
use super::handler::{HandlerError, JobHandler};
use super::options::JobOptions;
use crate::domain::{JobId, JobOutcome, JobStatus};
use crate::events::EventEmitter;
use crate::queue::QueueRequest;

/// How a single handler attempt settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Succeeded,
    Canceled,
    Failed(String),
    /// The handler task panicked or was aborted
    Unknown,
}

pub(crate) struct Job {
    handle: JobHandle,
    handler: Arc<dyn JobHandler>,
    repeat_delay: Duration,
    status: JobStatus,
    state: JobState,
    state_tx: watch::Sender<JobState>,
    completion_tx: Option<oneshot::Sender<JobOutcome>>,
    emitter: EventEmitter,
}

impl Job {
    pub(crate) fn new(
        display_name: String,
        handler: Arc<dyn JobHandler>,
        options: &JobOptions,
        emitter: EventEmitter,
    ) -> Self {
        let state = JobState::queued(options.retry_count);
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (completion_tx, completion_rx) = oneshot::channel();
        let handle = JobHandle::new(display_name, options, state_rx, completion_rx);
        debug!(
            job = %handle.display_name(),
            id = %handle.id().short(),
            ?options,
            "Job::new: called"
        );
        Self {
            handle,
            handler,
            repeat_delay: options.repeat_delay,
            status: JobStatus::Queued,
            state,
            state_tx,
            completion_tx: Some(completion_tx),
            emitter,
        }
    }

    pub(crate) fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub(crate) fn id(&self) -> JobId {
        self.handle.id()
    }

    pub(crate) fn out_of_band(&self) -> bool {
        self.handle.out_of_band()
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.status
    }

    /// Terminal with no retry or repeat pending
    ///
    /// Retries and repeats move a job straight back to `Queued` (or keep it
    /// `Running` through a repeat wait), so any finished status is final.
    pub(crate) fn is_done(&self) -> bool {
        self.status.is_finished()
    }

    fn repeats(&self) -> bool {
        !self.repeat_delay.is_zero()
    }

    /// Announce the job as placed in the queue
    pub(crate) fn on_queued(&mut self) {
        debug!(job = %self.handle.display_name(), "Job::on_queued: called");
        self.state.status_text = JobStatus::Queued.to_string();
        self.publish();
        self.emitter
            .status_changed(&self.handle, None, JobStatus::Queued, &self.state.status_text);
    }

    /// Start one run attempt
    ///
    /// Only valid from `Queued`; returns false otherwise, or when the inbox
    /// has no senders left to report the outcome through. The handler runs on
    /// its own task and the settled outcome arrives later as
    /// `QueueRequest::Settled`.
    pub(crate) fn run(&mut self, inbox: &mpsc::WeakSender<QueueRequest>) -> bool {
        if self.status != JobStatus::Queued {
            debug!(job = %self.handle.display_name(), status = %self.status, "Job::run: not queued, ignoring");
            return false;
        }
        let Some(inbox) = inbox.upgrade() else {
            debug!(job = %self.handle.display_name(), "Job::run: queue closing, not starting");
            return false;
        };

        self.state.retries_remaining = self.state.retries_remaining.saturating_sub(1);
        self.state.attempts += 1;
        self.change_status(JobStatus::Running, None);

        let id = self.id();
        let attempt = self.state.attempts;
        let handler = Arc::clone(&self.handler);
        let job = self.handle.clone();
        debug!(job = %job.display_name(), attempt, "Job::run: spawning handler");

        tokio::spawn(async move {
            let attempt_task = tokio::spawn(async move { handler.run(job).await });
            let outcome = match attempt_task.await {
                Ok(Ok(())) => RunOutcome::Succeeded,
                Ok(Err(HandlerError::Canceled)) => RunOutcome::Canceled,
                Ok(Err(HandlerError::Failed(report))) => RunOutcome::Failed(report.to_string()),
                Err(e) => {
                    warn!(%id, attempt, error = %e, "Job handler task panicked");
                    RunOutcome::Unknown
                }
            };
            if inbox.send(QueueRequest::Settled { id, attempt, outcome }).await.is_err() {
                debug!(%id, "Job::run: queue closed before attempt settled");
            }
        });

        true
    }

    /// Apply the outcome of the attempt started by [`Job::run`]
    pub(crate) fn settle(&mut self, outcome: RunOutcome, inbox: &mpsc::WeakSender<QueueRequest>) {
        let name = self.handle.display_name().to_string();
        debug!(job = %name, ?outcome, "Job::settle: called");

        if self.status != JobStatus::Running {
            warn!(job = %name, status = %self.status, "Job::settle: job not running, ignoring outcome");
            return;
        }

        if outcome == RunOutcome::Canceled || self.handle.is_cancelled() {
            debug!(job = %name, "Job::settle: canceled branch");
            self.finish(JobStatus::Canceled, None);
            return;
        }

        match outcome {
            RunOutcome::Failed(message) => {
                self.state.last_error = Some(message.clone());
                if self.state.retries_remaining > 0 || self.repeats() {
                    warn!(
                        job = %name,
                        retries_remaining = self.state.retries_remaining,
                        error = %message,
                        "Job attempt failed, requeueing"
                    );
                    self.emitter.attempt_failed(&self.handle, &message);
                    self.change_status(JobStatus::Queued, None);
                } else {
                    warn!(job = %name, error = %message, "Job failed, no attempts left");
                    self.finish(JobStatus::Failed, Some(format!("Failed - Exception: {}", message)));
                }
            }
            RunOutcome::Succeeded if !self.repeats() => {
                debug!(job = %name, "Job::settle: succeeded branch");
                self.finish(JobStatus::Succeeded, None);
            }
            RunOutcome::Succeeded => {
                debug!(job = %name, delay = ?self.repeat_delay, "Job::settle: waiting to repeat");
                self.wait_to_repeat(inbox);
            }
            // Canceled was handled above
            RunOutcome::Canceled | RunOutcome::Unknown => {
                warn!(job = %name, "Job::settle: unknown completion");
                self.finish(JobStatus::Failed, Some("Unknown Completion".to_string()));
            }
        }
    }

    /// Cancellable wait before the next repeat; the job stays `Running` meanwhile
    ///
    /// With every queue handle gone nothing could cancel the job later, so it
    /// ends as `Canceled` instead of repeating forever.
    fn wait_to_repeat(&mut self, inbox: &mpsc::WeakSender<QueueRequest>) {
        let Some(inbox) = inbox.upgrade() else {
            debug!(job = %self.handle.display_name(), "Job::wait_to_repeat: queue closing, not repeating");
            self.handle.cancel();
            self.finish(JobStatus::Canceled, None);
            return;
        };
        let id = self.id();
        let delay = self.repeat_delay;
        let token = self.handle.cancellation_token();

        tokio::spawn(async move {
            let canceled = tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if inbox.send(QueueRequest::RepeatElapsed { id, canceled }).await.is_err() {
                debug!(%id, "Job::wait_to_repeat: queue closed during repeat wait");
            }
        });
    }

    /// Apply the end of a repeat wait
    pub(crate) fn repeat_elapsed(&mut self, canceled: bool) {
        debug!(job = %self.handle.display_name(), canceled, "Job::repeat_elapsed: called");
        if self.status != JobStatus::Running {
            warn!(job = %self.handle.display_name(), status = %self.status, "Job::repeat_elapsed: job not running, ignoring");
            return;
        }

        if canceled || self.handle.is_cancelled() {
            self.finish(JobStatus::Canceled, None);
        } else {
            self.change_status(JobStatus::Queued, None);
        }
    }

    /// Cancel a job that will never run again, without starting it
    pub(crate) fn abandon(&mut self) {
        debug!(job = %self.handle.display_name(), "Job::abandon: called");
        self.handle.cancel();
        if self.status == JobStatus::Queued {
            self.finish(JobStatus::Canceled, None);
        }
    }

    /// Enter a terminal status and resolve the completion signal
    fn finish(&mut self, status: JobStatus, status_text: Option<String>) {
        self.change_status(status, status_text);
        info!(
            job = %self.handle.display_name(),
            %status,
            attempts = self.state.attempts,
            "Job finished"
        );
        if let Some(tx) = self.completion_tx.take() {
            let _ = tx.send(JobOutcome {
                status,
                status_text: self.state.status_text.clone(),
                attempts: self.state.attempts,
            });
        }
    }

    fn change_status(&mut self, status: JobStatus, status_text: Option<String>) {
        let previous = self.status;
        self.status = status;
        self.state.status = status;
        self.state.status_text = status_text.unwrap_or_else(|| status.to_string());
        self.publish();
        self.emitter
            .status_changed(&self.handle, Some(previous), status, &self.state.status_text);
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}
