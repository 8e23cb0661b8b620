//! Job handler trait.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use queue_core::{Job, JobResult};

/// Result type for job handlers. Errors drive the retry policy.
pub type HandlerResult = Result<JobResult, String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// The consumer of one queue.
///
/// The returned future runs on its own task; a panic inside it counts as a
/// failure of the job, not of the worker.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job and return the result.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

impl fmt::Debug for dyn JobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JobHandler")
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async closures.
///
/// ```ignore
/// let handler = job_handler!(|job| {
///     tracing::info!(job_id = %job.id, "working");
///     Ok(JobResult::new("done"))
/// });
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(|$job: &$crate::queue_core::Job| -> $crate::HandlerFuture {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}
