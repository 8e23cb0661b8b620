//! Message types for actor communication.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobId, JobOptions, JobResult, Queue, QueueConfig, Schedule};
use ractor::RpcReplyPort;

use crate::error::EngineError;
use crate::handler::{HandlerResult, JobHandler};

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Persist a new job. Replies `None` when a singleton key suppressed it.
    Enqueue {
        job: Box<Job>,
        reply: RpcReplyPort<Result<Option<Job>, EngineError>>,
    },

    /// Request the next job for a worker.
    RequestJob {
        worker_id: String,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Report job completion.
    JobCompleted {
        job: Box<Job>,
        worker_id: String,
        result: JobResult,
        duration_ms: u64,
    },

    /// Report job failure.
    JobFailed {
        job: Box<Job>,
        worker_id: String,
        error: String,
    },

    /// Cancel a pending job. Replies whether it was cancelled.
    CancelJob {
        job_id: JobId,
        reply: RpcReplyPort<Result<bool, EngineError>>,
    },

    /// Spawn `concurrency` workers running `handler`.
    StartWorkers {
        handler: Arc<dyn JobHandler>,
        reply: RpcReplyPort<Result<usize, EngineError>>,
    },

    /// Queue config changed.
    Reconfigure { queue: Queue },

    /// Fail active jobs that outlived their expiry.
    Expire {
        at: DateTime<Utc>,
        reply: Option<RpcReplyPort<usize>>,
    },

    /// Shutdown the queue and its workers.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the queue for work if idle.
    Poll,

    /// The handler task for the current job finished.
    JobFinished {
        job: Box<Job>,
        outcome: HandlerResult,
        duration_ms: u64,
    },

    /// Shutdown the worker.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Provision a queue. With `replace`, an existing queue takes the given
    /// config and description.
    CreateQueue {
        queue: Queue,
        replace: bool,
        reply: RpcReplyPort<Result<Queue, EngineError>>,
    },

    /// Send a job to a queue.
    Send {
        queue_name: String,
        payload: serde_json::Value,
        options: JobOptions,
        reply: RpcReplyPort<Result<Option<Job>, EngineError>>,
    },

    /// Cancel a pending job of a queue.
    Cancel {
        queue_name: String,
        job_id: JobId,
        reply: RpcReplyPort<Result<bool, EngineError>>,
    },

    /// Register the consumer of a queue.
    Work {
        queue_name: String,
        config: Option<QueueConfig>,
        handler: Arc<dyn JobHandler>,
        reply: RpcReplyPort<Result<usize, EngineError>>,
    },

    /// Create or replace a queue's schedule.
    Schedule {
        schedule: Box<Schedule>,
        reply: RpcReplyPort<Result<Schedule, EngineError>>,
    },

    /// Evaluate schedules as of `at`. Replies with the jobs sent.
    CronTick {
        at: DateTime<Utc>,
        reply: Option<RpcReplyPort<Vec<JobId>>>,
    },

    /// Expire, archive and prune as of `at`.
    Maintenance {
        at: DateTime<Utc>,
        reply: Option<RpcReplyPort<MaintenanceReport>>,
    },

    /// Shutdown all queues.
    Shutdown,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub archived: usize,
    pub pruned: usize,
}
