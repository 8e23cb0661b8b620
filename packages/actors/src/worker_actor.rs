//! Worker actor for executing jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use queue_core::{Job, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::task::JoinHandle;

use crate::handler::{HandlerResult, JobHandler};
use crate::messages::{QueueMessage, WorkerMessage};

/// How long a worker waits for its queue to answer a work request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Queue this worker consumes.
    pub queue_name: String,
    /// Job currently in flight.
    pub current_job: Option<JobId>,
    /// Queue actor reference.
    queue: ActorRef<QueueMessage>,
    /// The queue's handler.
    handler: Arc<dyn JobHandler>,
    /// Periodic poll loop.
    ticker: Option<JoinHandle<()>>,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue_name: String,
    pub queue: ActorRef<QueueMessage>,
    pub handler: Arc<dyn JobHandler>,
    pub poll_interval: Duration,
}

/// Run the handler on its own task, bounded by the job's expiry.
///
/// Panics and timeouts come back as failures.
fn spawn_execution(myself: ActorRef<WorkerMessage>, handler: Arc<dyn JobHandler>, job: Job) {
    let timeout = Duration::from_secs(job.expire_in_secs.max(1));

    tokio::spawn(async move {
        let started = Instant::now();
        let mut run = tokio::spawn(handler.handle(&job));

        let outcome: HandlerResult = match tokio::time::timeout(timeout, &mut run).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => Err("handler panicked".to_string()),
            Ok(Err(join_err)) => Err(format!("handler aborted: {}", join_err)),
            Err(_) => {
                run.abort();
                Err(format!("job timed out after {}s", timeout.as_secs()))
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let _ = myself.send_message(WorkerMessage::JobFinished {
            job: Box::new(job),
            outcome,
            duration_ms,
        });
    });
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %args.worker_id, queue = %args.queue_name, "Starting worker");

        // Start the poll loop; the first tick fires immediately.
        let myself_clone = myself.clone();
        let poll_interval = args.poll_interval;
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue_name: args.queue_name,
            current_job: None,
            queue: args.queue,
            handler: args.handler,
            ticker: Some(ticker),
        })
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        tracing::info!(worker_id = %state.worker_id, "Worker stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.is_idle() {
                    return Ok(());
                }

                let result = ractor::rpc::call(
                    &state.queue,
                    |reply| QueueMessage::RequestJob {
                        worker_id: state.worker_id.clone(),
                        reply,
                    },
                    Some(REQUEST_TIMEOUT),
                )
                .await;

                match result {
                    Ok(ractor::rpc::CallResult::Success(Some(job))) => {
                        tracing::debug!(
                            worker_id = %state.worker_id,
                            job_id = %job.id,
                            "Processing job"
                        );
                        state.current_job = Some(job.id);
                        spawn_execution(myself.clone(), state.handler.clone(), job);
                    }
                    Ok(ractor::rpc::CallResult::Success(None)) => {}
                    Ok(ractor::rpc::CallResult::Timeout) => {
                        tracing::debug!(worker_id = %state.worker_id, "Work request timed out");
                    }
                    Ok(ractor::rpc::CallResult::SenderError) => {
                        tracing::debug!(worker_id = %state.worker_id, "Work request dropped");
                    }
                    Err(_) => {
                        // Queue actor is gone.
                        myself.stop(None);
                    }
                }
            }

            WorkerMessage::JobFinished {
                job,
                outcome,
                duration_ms,
            } => {
                state.current_job = None;

                let report = match outcome {
                    Ok(result) => QueueMessage::JobCompleted {
                        job,
                        worker_id: state.worker_id.clone(),
                        result,
                        duration_ms,
                    },
                    Err(error) => QueueMessage::JobFailed {
                        job,
                        worker_id: state.worker_id.clone(),
                        error,
                    },
                };
                state.queue.send_message(report)?;

                // More work may already be waiting.
                myself.send_message(WorkerMessage::Poll)?;
            }

            WorkerMessage::Shutdown => {
                tracing::info!(worker_id = %state.worker_id, "Shutting down worker");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
