//! Handler trait - the unit of work a job runs

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use super::handle::JobHandle;

/// How a handler attempt can end other than success
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed its job's cancellation signal
    #[error("canceled")]
    Canceled,

    /// The attempt failed; the message becomes the job's status text
    #[error(transparent)]
    Failed(#[from] eyre::Report),
}

impl HandlerError {
    /// Failure with a plain message
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(eyre::eyre!("{}", message))
    }
}

/// Result of one handler attempt
pub type HandlerResult = Result<(), HandlerError>;

/// Asynchronous work run by a job
///
/// Invoked once per run attempt with a handle to its own job, which carries
/// the display name and the cancellation signal. Cancellation is
/// cooperative: a handler that never checks the signal runs to completion.
///
/// Any `Fn(JobHandle) -> impl Future<Output = HandlerResult>` closure is a
/// handler.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn run(&self, job: JobHandle) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, job: JobHandle) -> HandlerResult {
        (self)(job).await
    }
}
