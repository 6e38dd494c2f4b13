//! JobQueue actor and scheduling pass

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::QueueConfig;
use super::handle::QueueHandle;
use super::messages::{QueueError, QueueRequest};
use crate::domain::{JobId, JobStatus};
use crate::events::{EventBus, EventEmitter};
use crate::job::{Job, JobHandle, JobHandler, JobOptions, RunOutcome};

/// The queue actor
///
/// Create with [`JobQueue::new`], hand out [`QueueHandle`]s, then drive it
/// with [`JobQueue::run`] on its own task. [`JobQueue::spawn`] does all
/// three.
pub struct JobQueue {
    config: QueueConfig,
    tx: mpsc::Sender<QueueRequest>,
    rx: mpsc::Receiver<QueueRequest>,
    bus: Arc<EventBus>,
}

impl JobQueue {
    /// Create a new queue with the given configuration
    pub fn new(config: QueueConfig) -> Self {
        debug!(?config, "JobQueue::new: called");
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let bus = Arc::new(EventBus::new(config.event_capacity));
        Self { config, tx, rx, bus }
    }

    /// Spawn the actor on the current tokio runtime and return a handle to it
    pub fn spawn(config: QueueConfig) -> QueueHandle {
        let queue = Self::new(config);
        let handle = queue.handle();
        tokio::spawn(queue.run());
        handle
    }

    /// Create a client handle
    pub fn handle(&self) -> QueueHandle {
        QueueHandle::new(self.tx.clone(), Arc::clone(&self.bus))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Run the actor
    ///
    /// Consumes the queue and runs until a shutdown request has drained
    /// every tracked job, or until every [`QueueHandle`] is dropped and no
    /// attempt or repeat wait is still in flight.
    pub async fn run(self) {
        info!("JobQueue started");
        let Self { tx, mut rx, bus, .. } = self;
        let mut table = JobTable::new(tx.downgrade(), bus.emitter());
        drop(tx);
        let mut shutdown_replies: Vec<oneshot::Sender<()>> = Vec::new();

        while let Some(request) = rx.recv().await {
            debug!(kind = request.kind(), "JobQueue::run: received request");
            match request {
                QueueRequest::Submit {
                    display_name,
                    handler,
                    options,
                    reply,
                } => {
                    let result = if shutdown_replies.is_empty() {
                        Ok(table.submit(display_name, handler, &options))
                    } else {
                        debug!(%display_name, "JobQueue::run: shutting down, rejecting submission");
                        Err(QueueError::Closed)
                    };
                    let _ = reply.send(result);
                }

                QueueRequest::Jobs { reply } => {
                    let _ = reply.send(table.snapshot());
                }

                QueueRequest::Cancel { id, reply } => {
                    let _ = reply.send(table.cancel(id));
                }

                QueueRequest::CancelAll { reply } => {
                    let _ = reply.send(table.cancel_all());
                }

                QueueRequest::Reschedule { reply } => {
                    let _ = reply.send(table.pass());
                    table.schedule();
                }

                QueueRequest::Settled { id, attempt, outcome } => {
                    table.settle(id, attempt, outcome);
                }

                QueueRequest::RepeatElapsed { id, canceled } => {
                    table.repeat_elapsed(id, canceled);
                }

                QueueRequest::Shutdown { reply } => {
                    info!(tracked = table.len(), "JobQueue shutdown requested");
                    table.abandon_all();
                    shutdown_replies.push(reply);
                }
            }

            if !shutdown_replies.is_empty() && table.is_empty() {
                debug!("JobQueue::run: drained, stopping");
                break;
            }
        }

        if shutdown_replies.is_empty() {
            info!(tracked = table.len(), "JobQueue: all handles dropped");
            table.abandon_all();
        }
        for reply in shutdown_replies {
            let _ = reply.send(());
        }
        info!("JobQueue stopped");
    }
}

/// The ordered job collection and its admission policy
pub(crate) struct JobTable {
    /// Oldest first
    jobs: Vec<Job>,
    inbox: mpsc::WeakSender<QueueRequest>,
    emitter: EventEmitter,
}

impl JobTable {
    pub(crate) fn new(inbox: mpsc::WeakSender<QueueRequest>, emitter: EventEmitter) -> Self {
        Self {
            jobs: Vec::new(),
            inbox,
            emitter,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Append a job at the tail, mark it queued and schedule
    pub(crate) fn submit(&mut self, display_name: String, handler: Arc<dyn JobHandler>, options: &JobOptions) -> JobHandle {
        debug!(%display_name, "JobTable::submit: called");
        let mut job = Job::new(display_name, handler, options, self.emitter.clone());
        let handle = job.handle().clone();
        job.on_queued();
        self.jobs.push(job);
        self.schedule();
        handle
    }

    /// Oldest-first snapshot of tracked jobs
    pub(crate) fn snapshot(&self) -> Vec<JobHandle> {
        self.jobs.iter().map(|job| job.handle().clone()).collect()
    }

    pub(crate) fn cancel(&mut self, id: JobId) -> bool {
        match self.jobs.iter().find(|job| job.id() == id) {
            Some(job) => {
                debug!(job = %job.handle().display_name(), "JobTable::cancel: raising cancellation");
                job.handle().cancel();
                true
            }
            None => {
                debug!(%id, "JobTable::cancel: job not tracked");
                false
            }
        }
    }

    pub(crate) fn cancel_all(&mut self) -> usize {
        debug!(count = self.jobs.len(), "JobTable::cancel_all: called");
        for job in &self.jobs {
            job.handle().cancel();
        }
        self.jobs.len()
    }

    /// Cancel everything; queued jobs end without running
    pub(crate) fn abandon_all(&mut self) {
        for job in &mut self.jobs {
            job.abandon();
        }
        self.schedule();
    }

    pub(crate) fn settle(&mut self, id: JobId, attempt: u32, outcome: RunOutcome) {
        let inbox = self.inbox.clone();
        match self.jobs.iter_mut().find(|job| job.id() == id) {
            Some(job) => {
                debug!(job = %job.handle().display_name(), attempt, "JobTable::settle: applying outcome");
                job.settle(outcome, &inbox);
            }
            None => warn!(%id, attempt, "JobTable::settle: outcome for untracked job"),
        }
        self.schedule();
    }

    pub(crate) fn repeat_elapsed(&mut self, id: JobId, canceled: bool) {
        match self.jobs.iter_mut().find(|job| job.id() == id) {
            Some(job) => job.repeat_elapsed(canceled),
            None => warn!(%id, "JobTable::repeat_elapsed: untracked job"),
        }
        self.schedule();
    }

    /// Run scheduling passes until one starts nothing
    ///
    /// Starting a job is itself a status change, which triggers the next
    /// pass, so this fills both lanes when both have eligible work.
    pub(crate) fn schedule(&mut self) {
        while self.pass().is_some() {}
    }

    /// One scheduling pass; returns the job it started, if any
    ///
    /// Purges finished jobs, then picks a single candidate: the oldest queued
    /// job, upgraded to the oldest queued out-of-band job when one exists.
    /// The candidate starts only if its own lane is free; a blocked
    /// candidate blocks the pass.
    pub(crate) fn pass(&mut self) -> Option<JobId> {
        self.purge();

        let mut regular_running = false;
        let mut out_of_band_running = false;
        let mut candidate: Option<usize> = None;

        for (index, job) in self.jobs.iter().enumerate() {
            match job.status() {
                JobStatus::Running if job.out_of_band() => out_of_band_running = true,
                JobStatus::Running => regular_running = true,
                JobStatus::Queued => match candidate {
                    None => candidate = Some(index),
                    Some(current) if !self.jobs[current].out_of_band() && job.out_of_band() => {
                        candidate = Some(index);
                    }
                    Some(_) => {}
                },
                _ => {}
            }
        }

        let chosen = match candidate {
            None => {
                debug!("JobTable::pass: nothing queued");
                return None;
            }
            Some(index) if self.jobs[index].out_of_band() && !out_of_band_running => index,
            Some(index) if !self.jobs[index].out_of_band() && !regular_running => index,
            Some(_) => {
                debug!(regular_running, out_of_band_running, "JobTable::pass: lane busy");
                return None;
            }
        };

        let inbox = self.inbox.clone();
        let job = &mut self.jobs[chosen];
        if job.run(&inbox) {
            debug!(job = %job.handle().display_name(), out_of_band = job.out_of_band(), "JobTable::pass: started job");
            Some(job.id())
        } else {
            None
        }
    }

    /// Drop jobs that are terminal with nothing pending
    fn purge(&mut self) {
        self.jobs.retain(|job| {
            if job.is_done() {
                debug!(job = %job.handle().display_name(), status = %job.status(), "JobTable::purge: removing");
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    fn statuses(&self) -> Vec<(String, JobStatus)> {
        self.jobs
            .iter()
            .map(|job| (job.handle().display_name().to_string(), job.status()))
            .collect()
    }
}
