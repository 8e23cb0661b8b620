//! Queue actor for managing jobs in a single queue.
//!
//! The job store is the source of truth; the actor serialises this process's
//! transitions for one queue and keeps track of the attempts its own workers
//! are running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::repositories::JobRepository;
use queue_core::{Job, JobEvent, JobId, JobResult, JobState, Queue};
use ractor::{Actor, ActorProcessingErr, ActorRef, MessagingErr};
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::handler::JobHandler;
use crate::messages::{QueueMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// State for the queue actor.
pub struct QueueActorState {
    /// Queue metadata.
    pub queue: Queue,
    /// Job store.
    jobs: JobRepository,
    /// Attempts currently held by this queue's workers, by worker ID.
    running: HashMap<JobId, String>,
    /// Workers consuming this queue, by worker ID.
    workers: Vec<(String, ActorRef<WorkerMessage>)>,
    /// Worker poll interval.
    poll_interval: Duration,
    /// Event broadcaster.
    event_tx: broadcast::Sender<JobEvent>,
}

impl QueueActorState {
    /// Create a new queue actor state.
    pub fn new(
        queue: Queue,
        jobs: JobRepository,
        poll_interval: Duration,
        event_tx: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            queue,
            jobs,
            running: HashMap::new(),
            workers: Vec::new(),
            poll_interval,
            event_tx,
        }
    }

    /// Broadcast an event. Nobody listening is fine.
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Wake idle workers so new work is picked up without waiting a poll.
    fn nudge_workers(&self) {
        for (_, worker) in &self.workers {
            let _ = worker.send_message(WorkerMessage::Poll);
        }
    }

    async fn enqueue(&mut self, job: Job) -> Result<Option<Job>, EngineError> {
        let stored = self.jobs.insert(&job).await.map_err(|e| EngineError::EnqueueFailed {
            queue: self.queue.name.clone(),
            reason: e.to_string(),
        })?;

        if let Some(job) = &stored {
            tracing::debug!(queue = %self.queue.name, job_id = %job.id, "job enqueued");
            self.broadcast(JobEvent::JobEnqueued {
                job: job.clone(),
                timestamp: Utc::now(),
            });
            self.nudge_workers();
        }

        Ok(stored)
    }

    async fn next_job(&mut self, worker_id: String) -> Option<Job> {
        if self.running.len() >= self.queue.config.worker_count() {
            return None;
        }

        let now = Utc::now();
        match self.jobs.fetch_next(&self.queue.name, now).await {
            Ok(Some(job)) => {
                self.running.insert(job.id, worker_id.clone());
                self.broadcast(JobEvent::JobStarted {
                    job_id: job.id,
                    queue_name: self.queue.name.clone(),
                    worker_id,
                    timestamp: now,
                });
                Some(job)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(queue = %self.queue.name, error = %e, "Failed to fetch next job");
                None
            }
        }
    }

    async fn release(&mut self, job: Job) {
        self.running.remove(&job.id);

        match self.jobs.release(&job).await {
            Ok(Some(released)) => {
                tracing::warn!(
                    queue = %self.queue.name,
                    job_id = %released.id,
                    state = %released.state.as_str(),
                    "job claimed for a worker that stopped waiting; released"
                );
                self.nudge_workers();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(queue = %self.queue.name, job_id = %job.id, error = %e, "Failed to release job");
            }
        }
    }

    async fn completed(&mut self, job: Job, worker_id: &str, result: JobResult, duration_ms: u64) {
        self.running.remove(&job.id);
        let now = Utc::now();
        let output = serde_json::to_value(&result).ok();

        match self.jobs.complete(&job, output, now).await {
            Ok(Some(_)) => {
                tracing::info!(
                    queue = %self.queue.name,
                    job_id = %job.id,
                    worker_id = %worker_id,
                    duration_ms,
                    "job completed"
                );
                self.broadcast(JobEvent::JobCompleted {
                    job_id: job.id,
                    queue_name: self.queue.name.clone(),
                    duration_ms,
                    timestamp: now,
                });
            }
            Ok(None) => {
                tracing::warn!(
                    queue = %self.queue.name,
                    job_id = %job.id,
                    "job finished after its attempt was expired; result dropped"
                );
            }
            Err(e) => {
                tracing::error!(queue = %self.queue.name, job_id = %job.id, error = %e, "Failed to record completion");
            }
        }
    }

    async fn failed(&mut self, job: Job, worker_id: &str, error: String) {
        self.running.remove(&job.id);
        let now = Utc::now();
        let details = serde_json::json!({ "message": error, "worker_id": worker_id });

        match self.jobs.fail(&job, details, now).await {
            Ok(Some(updated)) => self.report_failure(&updated, error, now),
            Ok(None) => {
                tracing::warn!(
                    queue = %self.queue.name,
                    job_id = %job.id,
                    "job failed after its attempt was expired; failure dropped"
                );
            }
            Err(e) => {
                tracing::error!(queue = %self.queue.name, job_id = %job.id, error = %e, "Failed to record failure");
            }
        }
    }

    fn report_failure(&self, job: &Job, error: String, now: chrono::DateTime<Utc>) {
        let will_retry = job.state == JobState::Retry;

        if will_retry {
            tracing::warn!(
                queue = %self.queue.name,
                job_id = %job.id,
                retry_count = job.retry_count,
                error = %error,
                "job failed, will retry"
            );
        } else {
            tracing::error!(
                queue = %self.queue.name,
                job_id = %job.id,
                retry_count = job.retry_count,
                error = %error,
                "job failed, retries exhausted"
            );
        }

        self.broadcast(JobEvent::JobFailed {
            job_id: job.id,
            queue_name: self.queue.name.clone(),
            error,
            retry_count: job.retry_count,
            will_retry,
            timestamp: now,
        });

        if will_retry {
            self.broadcast(JobEvent::JobRetrying {
                job_id: job.id,
                queue_name: self.queue.name.clone(),
                retry_count: job.retry_count,
                start_after: job.start_after,
                timestamp: now,
            });
        }
    }

    async fn cancel(&mut self, job_id: JobId) -> Result<bool, EngineError> {
        let now = Utc::now();

        let Some(job) = self.jobs.cancel(&self.queue.name, job_id, now).await? else {
            tracing::debug!(queue = %self.queue.name, job_id = %job_id, "job not cancellable");
            return Ok(false);
        };

        tracing::info!(queue = %self.queue.name, job_id = %job.id, "job cancelled");
        self.broadcast(JobEvent::JobCancelled {
            job_id: job.id,
            queue_name: self.queue.name.clone(),
            timestamp: now,
        });

        Ok(true)
    }

    async fn start_workers(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<usize, EngineError> {
        for n in 0..self.queue.config.worker_count() {
            let worker_id = format!("{}-worker-{}", self.queue.name, n + 1);
            let args = WorkerArgs {
                worker_id: worker_id.clone(),
                queue_name: self.queue.name.clone(),
                queue: myself.clone(),
                handler: handler.clone(),
                poll_interval: self.poll_interval,
            };

            let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
                .await
                .map_err(|e| EngineError::Actor(format!("Failed to spawn worker: {}", e)))?;

            self.workers.push((worker_id, worker));
        }

        Ok(self.workers.len())
    }

    async fn expire_at(&mut self, at: chrono::DateTime<Utc>) -> usize {
        let expired = match self.jobs.expire_active(&self.queue.name, at).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(queue = %self.queue.name, error = %e, "Failed to expire jobs");
                return 0;
            }
        };

        for job in &expired {
            self.running.remove(&job.id);
            let will_retry = job.state == JobState::Retry;
            tracing::warn!(
                queue = %self.queue.name,
                job_id = %job.id,
                will_retry,
                "active job expired"
            );
            self.broadcast(JobEvent::JobExpired {
                job_id: job.id,
                queue_name: self.queue.name.clone(),
                will_retry,
                timestamp: at,
            });
        }

        if !expired.is_empty() {
            self.nudge_workers();
        }

        expired.len()
    }
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(queue = %args.queue.name, "Starting queue actor");
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { job, reply } => {
                let _ = reply.send(state.enqueue(*job).await);
            }

            QueueMessage::RequestJob { worker_id, reply } => {
                let job = state.next_job(worker_id).await;
                if let Err(MessagingErr::SendErr(Some(job))) = reply.send(job) {
                    // The worker stopped waiting before the claim landed.
                    state.release(job).await;
                }
            }

            QueueMessage::JobCompleted {
                job,
                worker_id,
                result,
                duration_ms,
            } => {
                state.completed(*job, &worker_id, result, duration_ms).await;
            }

            QueueMessage::JobFailed {
                job,
                worker_id,
                error,
            } => {
                state.failed(*job, &worker_id, error).await;
            }

            QueueMessage::CancelJob { job_id, reply } => {
                let _ = reply.send(state.cancel(job_id).await);
            }

            QueueMessage::StartWorkers { handler, reply } => {
                let result = if state.workers.is_empty() {
                    state.start_workers(&myself, handler).await
                } else {
                    Err(EngineError::HandlerAlreadyRegistered(state.queue.name.clone()))
                };
                if let Ok(count) = &result {
                    tracing::info!(queue = %state.queue.name, workers = count, "Workers started");
                }
                let _ = reply.send(result);
            }

            QueueMessage::Reconfigure { queue } => {
                tracing::info!(queue = %queue.name, "Queue reconfigured");
                state.queue = queue;
            }

            QueueMessage::Expire { at, reply } => {
                let count = state.expire_at(at).await;
                if let Some(reply) = reply {
                    let _ = reply.send(count);
                }
            }

            QueueMessage::Shutdown => {
                tracing::info!(queue = %state.queue.name, "Shutting down queue");
                for (_, worker) in state.workers.drain(..) {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: ractor::SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let ractor::SupervisionEvent::ActorFailed(cell, err) = message {
            tracing::error!(
                queue = %state.queue.name,
                worker = ?cell.get_id(),
                error = %err,
                "Worker failed"
            );
            let failed: Vec<String> = state
                .workers
                .iter()
                .filter(|(_, w)| w.get_id() == cell.get_id())
                .map(|(id, _)| id.clone())
                .collect();
            state.workers.retain(|(_, w)| w.get_id() != cell.get_id());
            // Free its slot; the attempt itself is recovered by the expiry sweep.
            state.running.retain(|_, worker_id| !failed.contains(worker_id));
        }
        Ok(())
    }
}
