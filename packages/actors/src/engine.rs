//! Handle to a running job queue engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::Database;
use db::repositories::{JobRepository, QueueRepository, ScheduleRepository};
use queue_core::{
    Job, JobEvent, JobId, JobOptions, JobState, Queue, QueueConfig, QueueStats, Schedule,
    ScheduleOptions,
};
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handler::JobHandler;
use crate::messages::{MaintenanceReport, SupervisorMessage};
use crate::supervisor::{Supervisor, SupervisorArgs};

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// A cloneable handle to the engine.
///
/// Writes go through the supervisor actor; reads go straight to the store.
#[derive(Clone)]
pub struct Engine {
    supervisor: ActorRef<SupervisorMessage>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    events: broadcast::Sender<JobEvent>,
    queues: QueueRepository,
    jobs: JobRepository,
    schedules: ScheduleRepository,
    config: EngineConfig,
}

impl Engine {
    /// Spawn the supervisor against `db`. The schema must already exist.
    pub async fn start(db: Database, config: EngineConfig) -> Result<Self, EngineError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let args = SupervisorArgs {
            db: db.clone(),
            config: config.clone(),
            event_tx: events.clone(),
        };

        let (supervisor, handle) = Actor::spawn(None, Supervisor, args)
            .await
            .map_err(|e| EngineError::Actor(format!("Failed to spawn supervisor: {}", e)))?;

        tracing::info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            cron_interval_ms = config.cron_interval.as_millis() as u64,
            "Job queue engine started"
        );

        Ok(Self {
            supervisor,
            handle: Arc::new(Mutex::new(Some(handle))),
            events,
            queues: QueueRepository::new(db.clone()),
            jobs: JobRepository::new(db.clone()),
            schedules: ScheduleRepository::new(db),
            config,
        })
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> SupervisorMessage,
    ) -> Result<T, EngineError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.supervisor
            .send_message(build(tx.into()))
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Provision a queue. An existing queue is returned unchanged.
    pub async fn create_queue(&self, name: &str, config: QueueConfig) -> Result<Queue, EngineError> {
        let queue = Queue::new(name).with_config(config);
        self.call(|reply| SupervisorMessage::CreateQueue {
            queue,
            replace: false,
            reply,
        })
        .await?
    }

    /// Replace the config of a queue, creating it if needed.
    pub async fn update_queue(&self, queue: Queue) -> Result<Queue, EngineError> {
        self.call(|reply| SupervisorMessage::CreateQueue {
            queue,
            replace: true,
            reply,
        })
        .await?
    }

    pub async fn get_queue(&self, name: &str) -> Result<Option<Queue>, EngineError> {
        Ok(self.queues.get(name).await?)
    }

    pub async fn list_queues(&self) -> Result<Vec<Queue>, EngineError> {
        Ok(self.queues.list().await?)
    }

    /// Send a job. `Ok(None)` when a live job already holds the singleton key.
    pub async fn send(
        &self,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<Option<JobId>, EngineError> {
        let job = self
            .call(|reply| SupervisorMessage::Send {
                queue_name: name.to_string(),
                payload,
                options,
                reply,
            })
            .await??;

        Ok(job.map(|j| j.id))
    }

    /// Create or replace the recurring trigger of a queue.
    pub async fn schedule(
        &self,
        name: &str,
        cron: &str,
        payload: Option<serde_json::Value>,
        options: ScheduleOptions,
    ) -> Result<Schedule, EngineError> {
        let timezone = options
            .timezone
            .clone()
            .unwrap_or_else(|| self.config.timezone.name().to_string());
        let schedule = Schedule::new(name, cron, timezone, payload, options)?;

        self.call(|reply| SupervisorMessage::Schedule {
            schedule: Box::new(schedule),
            reply,
        })
        .await?
    }

    /// Remove the recurring trigger of a queue. Returns whether one existed.
    pub async fn unschedule(&self, name: &str) -> Result<bool, EngineError> {
        let removed = self.schedules.delete(name).await?;
        if removed {
            tracing::info!(queue = %name, "Schedule removed");
        }
        Ok(removed)
    }

    pub async fn schedules(&self) -> Result<Vec<Schedule>, EngineError> {
        Ok(self.schedules.list().await?)
    }

    pub async fn get_schedule(&self, name: &str) -> Result<Option<Schedule>, EngineError> {
        Ok(self.schedules.get(name).await?)
    }

    /// Cancel a job that has not started. Returns whether it was cancelled.
    pub async fn cancel(&self, name: &str, job_id: JobId) -> Result<bool, EngineError> {
        self.call(|reply| SupervisorMessage::Cancel {
            queue_name: name.to_string(),
            job_id,
            reply,
        })
        .await?
    }

    /// Register the consumer of a queue. Returns the number of workers.
    pub async fn work<H: JobHandler>(&self, name: &str, handler: H) -> Result<usize, EngineError> {
        self.work_with_config(name, None, Arc::new(handler)).await
    }

    /// Like [`Engine::work`], replacing the queue's config first when given.
    pub async fn work_with_config(
        &self,
        name: &str,
        config: Option<QueueConfig>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<usize, EngineError> {
        self.call(|reply| SupervisorMessage::Work {
            queue_name: name.to_string(),
            config,
            handler,
            reply,
        })
        .await?
    }

    /// Jobs of a queue in any of `states`, oldest first.
    pub async fn jobs(&self, name: &str, states: &[JobState]) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.list(name, states).await?)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, EngineError> {
        Ok(self.jobs.get(job_id).await?)
    }

    pub async fn queue_stats(&self, name: &str) -> Result<QueueStats, EngineError> {
        Ok(self.jobs.stats(name).await?)
    }

    /// Evaluate all schedules as of `at` now rather than on the next tick.
    pub async fn run_cron(&self, at: DateTime<Utc>) -> Result<Vec<JobId>, EngineError> {
        self.call(|reply| SupervisorMessage::CronTick {
            at,
            reply: Some(reply),
        })
        .await
    }

    /// Run a maintenance pass as of `at` now rather than on the next tick.
    pub async fn run_maintenance(&self, at: DateTime<Utc>) -> Result<MaintenanceReport, EngineError> {
        self.call(|reply| SupervisorMessage::Maintenance {
            at,
            reply: Some(reply),
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Stop all actors and wait for the supervisor to exit.
    ///
    /// Jobs still running are left `active` and recovered by expiry.
    pub async fn shutdown(&self) {
        let _ = self.supervisor.send_message(SupervisorMessage::Shutdown);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
        tracing::info!("Job queue engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("supervisor", &self.supervisor.get_id())
            .field("config", &self.config)
            .finish()
    }
}
