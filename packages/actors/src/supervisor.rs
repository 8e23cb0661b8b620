//! Supervisor actor for managing all queues, schedules and maintenance.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::Database;
use db::repositories::{JobRepository, QueueRepository, ScheduleRepository};
use queue_core::{Job, JobEvent, JobId, JobOptions, Queue, Schedule};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::handler::JobHandler;
use crate::messages::{MaintenanceReport, QueueMessage, SupervisorMessage};
use crate::queue_actor::{QueueActor, QueueActorState};

/// Supervisor actor arguments.
pub struct SupervisorArgs {
    pub db: Database,
    pub config: EngineConfig,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    /// Queue actors by queue name.
    queues: HashMap<String, ActorRef<QueueMessage>>,
    /// Queue metadata by queue name.
    queue_info: HashMap<String, Queue>,
    queue_repo: QueueRepository,
    job_repo: JobRepository,
    schedule_repo: ScheduleRepository,
    config: EngineConfig,
    /// Event broadcaster.
    event_tx: broadcast::Sender<JobEvent>,
    /// Cron and maintenance loops.
    tickers: Vec<JoinHandle<()>>,
}

impl SupervisorState {
    fn new(args: SupervisorArgs) -> Self {
        Self {
            queues: HashMap::new(),
            queue_info: HashMap::new(),
            queue_repo: QueueRepository::new(args.db.clone()),
            job_repo: JobRepository::new(args.db.clone()),
            schedule_repo: ScheduleRepository::new(args.db),
            config: args.config,
            event_tx: args.event_tx,
            tickers: Vec::new(),
        }
    }

    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn spawn_queue_actor(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue: Queue,
    ) -> Result<ActorRef<QueueMessage>, EngineError> {
        let queue_state = QueueActorState::new(
            queue.clone(),
            self.job_repo.clone(),
            self.config.poll_interval,
            self.event_tx.clone(),
        );

        let (actor, _handle) = Actor::spawn_linked(None, QueueActor, queue_state, myself.get_cell())
            .await
            .map_err(|e| EngineError::Actor(format!("Failed to spawn queue: {}", e)))?;

        self.queues.insert(queue.name.clone(), actor.clone());
        self.queue_info.insert(queue.name.clone(), queue);

        Ok(actor)
    }

    /// The actor for `name`, loading the queue from the store (and creating
    /// it with defaults when `create` is set) on first use.
    async fn ensure_queue(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        name: &str,
        create: bool,
    ) -> Result<ActorRef<QueueMessage>, EngineError> {
        if let Some(actor) = self.queues.get(name) {
            return Ok(actor.clone());
        }

        let queue = match self.queue_repo.get(name).await? {
            Some(queue) => queue,
            None if create => self.provision(Queue::new(name)).await?,
            None => return Err(EngineError::QueueNotFound(name.to_string())),
        };

        self.spawn_queue_actor(myself, queue).await
    }

    /// Store the queue unless it exists; announce it when new.
    async fn provision(&mut self, queue: Queue) -> Result<Queue, EngineError> {
        let (stored, created) = self.queue_repo.create_if_absent(&queue).await?;

        if created {
            tracing::info!(queue = %stored.name, "Queue created");
            self.broadcast(JobEvent::QueueCreated {
                queue: stored.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(stored)
    }

    async fn create_queue(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue: Queue,
        replace: bool,
    ) -> Result<Queue, EngineError> {
        let mut stored = self.provision(queue.clone()).await?;

        if replace && (stored.config != queue.config || stored.description != queue.description) {
            stored = self.queue_repo.update(&queue).await?;
            if let Some(actor) = self.queues.get(&stored.name) {
                actor.send_message(QueueMessage::Reconfigure {
                    queue: stored.clone(),
                })?;
            }
            self.queue_info.insert(stored.name.clone(), stored.clone());
        }

        if !self.queues.contains_key(&stored.name) {
            self.spawn_queue_actor(myself, stored.clone()).await?;
        }

        Ok(stored)
    }

    async fn send(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue_name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
    ) -> Result<Option<Job>, EngineError> {
        let actor = self
            .ensure_queue(myself, queue_name, self.config.auto_create_queues)
            .await?;
        let config = self
            .queue_info
            .get(queue_name)
            .map(|q| q.config.clone())
            .unwrap_or_default();

        let job = Job::from_options(queue_name, payload, &config, options, Utc::now());

        let (tx, rx) = ractor::concurrency::oneshot();
        actor.send_message(QueueMessage::Enqueue {
            job: Box::new(job),
            reply: tx.into(),
        })?;

        rx.await
            .map_err(|_| EngineError::Actor(format!("Queue '{}' dropped the enqueue", queue_name)))?
    }

    async fn cancel(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue_name: &str,
        job_id: JobId,
    ) -> Result<bool, EngineError> {
        let actor = match self.ensure_queue(myself, queue_name, false).await {
            Ok(actor) => actor,
            Err(EngineError::QueueNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let (tx, rx) = ractor::concurrency::oneshot();
        actor.send_message(QueueMessage::CancelJob {
            job_id,
            reply: tx.into(),
        })?;

        rx.await
            .map_err(|_| EngineError::Actor(format!("Queue '{}' dropped the cancel", queue_name)))?
    }

    async fn work(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        queue_name: &str,
        config: Option<queue_core::QueueConfig>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<usize, EngineError> {
        let replace = config.is_some();
        let queue = Queue::new(queue_name).with_config(config.unwrap_or_default());
        self.create_queue(myself, queue, replace).await?;

        let actor = self.ensure_queue(myself, queue_name, false).await?;
        let (tx, rx) = ractor::concurrency::oneshot();
        actor.send_message(QueueMessage::StartWorkers {
            handler,
            reply: tx.into(),
        })?;

        rx.await
            .map_err(|_| EngineError::Actor(format!("Queue '{}' dropped the work request", queue_name)))?
    }

    async fn schedule(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        schedule: Schedule,
    ) -> Result<Schedule, EngineError> {
        schedule.validate()?;
        self.ensure_queue(myself, &schedule.queue_name, self.config.auto_create_queues)
            .await?;

        let stored = self.schedule_repo.upsert(&schedule).await?;

        tracing::info!(
            queue = %stored.queue_name,
            cron = %stored.cron,
            timezone = %stored.timezone,
            "Schedule registered"
        );
        self.broadcast(JobEvent::ScheduleRegistered {
            queue_name: stored.queue_name.clone(),
            cron: stored.cron.clone(),
            timezone: stored.timezone.clone(),
            timestamp: Utc::now(),
        });

        Ok(stored)
    }

    /// Fire every schedule with an occurrence inside the look-back window
    /// ending at `at`. Each occurrence fires at most once across processes.
    async fn run_cron(&mut self, myself: &ActorRef<SupervisorMessage>, at: DateTime<Utc>) -> Vec<JobId> {
        let schedules = match self.schedule_repo.list().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load schedules");
                return Vec::new();
            }
        };

        let window = self.config.cron_window();
        let mut sent = Vec::new();

        for schedule in schedules {
            let occurrence = match schedule.latest_occurrence(at, window) {
                Ok(Some(occurrence)) => occurrence,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(queue = %schedule.queue_name, error = %e, "Skipping invalid schedule");
                    continue;
                }
            };

            match self.schedule_repo.claim_tick(&schedule.queue_name, occurrence).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(queue = %schedule.queue_name, error = %e, "Failed to claim schedule tick");
                    continue;
                }
            }

            let payload = schedule.payload.clone().unwrap_or(serde_json::Value::Null);
            let job_id = match self
                .send(myself, &schedule.queue_name, payload, &schedule.options.job)
                .await
            {
                Ok(job) => job.map(|j| j.id),
                Err(e) => {
                    tracing::error!(queue = %schedule.queue_name, error = %e, "Scheduled send failed");
                    continue;
                }
            };

            tracing::info!(
                queue = %schedule.queue_name,
                occurrence = %occurrence,
                job_id = ?job_id,
                "Schedule fired"
            );
            self.broadcast(JobEvent::ScheduleFired {
                queue_name: schedule.queue_name.clone(),
                occurrence,
                job_id,
                timestamp: Utc::now(),
            });
            sent.extend(job_id);
        }

        sent
    }

    async fn run_maintenance(
        &mut self,
        myself: &ActorRef<SupervisorMessage>,
        at: DateTime<Utc>,
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        let names: Vec<String> = match self.queue_repo.list().await {
            Ok(queues) => queues.into_iter().map(|q| q.name).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list queues for maintenance");
                self.queues.keys().cloned().collect()
            }
        };

        for name in names {
            let actor = match self.ensure_queue(myself, &name, false).await {
                Ok(actor) => actor,
                Err(e) => {
                    tracing::warn!(queue = %name, error = %e, "Skipping queue in maintenance");
                    continue;
                }
            };

            let (tx, rx) = ractor::concurrency::oneshot();
            let sent = actor.send_message(QueueMessage::Expire {
                at,
                reply: Some(tx.into()),
            });
            if sent.is_ok() {
                report.expired += rx.await.unwrap_or(0);
            }
        }

        match self.job_repo.archive_completed(at).await {
            Ok(count) => report.archived = count,
            Err(e) => tracing::warn!(error = %e, "Failed to archive jobs"),
        }

        let retention = chrono::Duration::from_std(self.config.archive_retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        match self.job_repo.prune_archive(at - retention).await {
            Ok(count) => report.pruned = count,
            Err(e) => tracing::warn!(error = %e, "Failed to prune archive"),
        }

        if report != MaintenanceReport::default() {
            tracing::info!(
                expired = report.expired,
                archived = report.archived,
                pruned = report.pruned,
                "Maintenance finished"
            );
        }

        report
    }
}

/// Spawn a loop sending `make()` to the supervisor every `period`, starting
/// one period from now.
fn spawn_ticker(
    myself: ActorRef<SupervisorMessage>,
    period: std::time::Duration,
    make: fn() -> SupervisorMessage,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if myself.send_message(make()).is_err() {
                break;
            }
        }
    })
}

/// Supervisor actor that manages all queues.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job queue supervisor");

        let mut state = SupervisorState::new(args);

        state.tickers.push(spawn_ticker(
            myself.clone(),
            state.config.cron_interval,
            || SupervisorMessage::CronTick {
                at: Utc::now(),
                reply: None,
            },
        ));
        state.tickers.push(spawn_ticker(
            myself.clone(),
            state.config.maintenance_interval,
            || SupervisorMessage::Maintenance {
                at: Utc::now(),
                reply: None,
            },
        ));

        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for ticker in state.tickers.drain(..) {
            ticker.abort();
        }
        tracing::info!("Supervisor stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::CreateQueue {
                queue,
                replace,
                reply,
            } => {
                let _ = reply.send(state.create_queue(&myself, queue, replace).await);
            }

            SupervisorMessage::Send {
                queue_name,
                payload,
                options,
                reply,
            } => {
                let _ = reply.send(state.send(&myself, &queue_name, payload, &options).await);
            }

            SupervisorMessage::Cancel {
                queue_name,
                job_id,
                reply,
            } => {
                let _ = reply.send(state.cancel(&myself, &queue_name, job_id).await);
            }

            SupervisorMessage::Work {
                queue_name,
                config,
                handler,
                reply,
            } => {
                let _ = reply.send(state.work(&myself, &queue_name, config, handler).await);
            }

            SupervisorMessage::Schedule { schedule, reply } => {
                let _ = reply.send(state.schedule(&myself, *schedule).await);
            }

            SupervisorMessage::CronTick { at, reply } => {
                let sent = state.run_cron(&myself, at).await;
                if let Some(reply) = reply {
                    let _ = reply.send(sent);
                }
            }

            SupervisorMessage::Maintenance { at, reply } => {
                let report = state.run_maintenance(&myself, at).await;
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                for queue_ref in state.queues.values() {
                    let _ = queue_ref.send_message(QueueMessage::Shutdown);
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            _ => return Ok(()),
        };

        let name = state
            .queues
            .iter()
            .find(|(_, actor)| actor.get_id() == cell.get_id())
            .map(|(name, _)| name.clone());

        if let Some(name) = name {
            tracing::warn!(queue = %name, reason = ?reason, "Queue actor terminated");
            // Reloaded from the store on next use.
            state.queues.remove(&name);
            state.queue_info.remove(&name);
        }

        Ok(())
    }
}
