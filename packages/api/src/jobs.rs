//! Typed job definitions.
//!
//! A [`JobDefinition`] binds a queue name to a payload type and a handler.
//! Application code emits, schedules, cancels and lists jobs through it and
//! never touches the engine's untyped JSON payloads directly.

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use actors::{Engine, HandlerFuture, JobHandler};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use queue_core::{Job, JobId, JobOptions, JobResult, JobState, QueueConfig, Schedule, ScheduleOptions};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::JobError;

type BoxedRun<T> =
    dyn Fn(T) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync;

/// A live job with its payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedJob<T> {
    pub id: JobId,
    pub queue_name: String,
    pub state: JobState,
    pub data: T,
    pub retry_count: u32,
    pub start_after: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
}

impl<T: DeserializeOwned> TypedJob<T> {
    fn from_job(job: Job) -> Result<Self, JobError> {
        Ok(Self {
            data: serde_json::from_value(job.payload)?,
            id: job.id,
            queue_name: job.queue_name,
            state: job.state,
            retry_count: job.retry_count,
            start_after: job.start_after,
            created_on: job.created_on,
        })
    }
}

/// A queue with a fixed payload type and handler.
///
/// Payload-less jobs use `T = ()`.
pub struct JobDefinition<T> {
    engine: Engine,
    name: String,
    run: Arc<BoxedRun<T>>,
    defaults: JobOptions,
    queue_config: Option<QueueConfig>,
    timezone: Tz,
    _payload: PhantomData<fn() -> T>,
}

impl<T> JobDefinition<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Define a job. The handler runs once per attempt; an `Err` triggers the
    /// queue's retry policy.
    pub fn new<F, Fut, E>(engine: Engine, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let run: Arc<BoxedRun<T>> = Arc::new(
            move |data: T| -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> {
                let fut = handler(data);
                Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
            },
        );

        let timezone = engine.config().timezone;

        Self {
            engine,
            name: name.into(),
            run,
            defaults: JobOptions::default(),
            queue_config: None,
            timezone,
            _payload: PhantomData,
        }
    }

    /// Options applied to every emit; per-call options win.
    pub fn with_defaults(mut self, defaults: JobOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Queue policy applied when [`JobDefinition::work`] registers the handler.
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = Some(config);
        self
    }

    /// Zone for [`JobDefinition::schedule`] unless the call names one.
    /// Defaults to the engine's configured zone.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a job now.
    pub async fn emit(&self, data: T) -> Result<JobId, JobError> {
        self.emit_with(data, JobOptions::default()).await
    }

    /// Enqueue a job with per-call options (delay, singleton key, ...).
    pub async fn emit_with(&self, data: T, options: JobOptions) -> Result<JobId, JobError> {
        let payload = serde_json::to_value(&data)?;
        let options = self.defaults.merge(&options);

        self.engine
            .send(&self.name, payload, options)
            .await?
            .ok_or_else(|| JobError::EmitFailed(self.name.clone()))
    }

    /// Install or replace the recurring trigger of this queue.
    pub async fn schedule(&self, cron: &str, data: T) -> Result<Schedule, JobError> {
        self.schedule_with(cron, data, ScheduleOptions::default()).await
    }

    pub async fn schedule_with(
        &self,
        cron: &str,
        data: T,
        options: ScheduleOptions,
    ) -> Result<Schedule, JobError> {
        let payload = serde_json::to_value(&data)?;
        let base = ScheduleOptions {
            timezone: Some(self.timezone.name().to_string()),
            job: self.defaults.clone(),
        };

        Ok(self
            .engine
            .schedule(&self.name, cron, Some(payload), base.merge(&options))
            .await?)
    }

    pub async fn unschedule(&self) -> Result<bool, JobError> {
        Ok(self.engine.unschedule(&self.name).await?)
    }

    /// Cancel a job that has not started. Returns whether it was cancelled.
    pub async fn cancel(&self, id: JobId) -> Result<bool, JobError> {
        Ok(self.engine.cancel(&self.name, id).await?)
    }

    /// Jobs that are waiting or running, oldest first.
    pub async fn get_jobs(&self) -> Result<Vec<TypedJob<T>>, JobError> {
        self.engine
            .jobs(&self.name, &JobState::LIVE)
            .await?
            .into_iter()
            .map(TypedJob::from_job)
            .collect()
    }

    /// Start consuming this queue. Returns the number of workers.
    pub async fn work(&self) -> Result<usize, JobError> {
        let handler = TypedHandler {
            queue_name: self.name.clone(),
            run: self.run.clone(),
        };

        Ok(self
            .engine
            .work_with_config(&self.name, self.queue_config.clone(), Arc::new(handler))
            .await?)
    }
}

/// Decodes the payload and logs each attempt around the user handler.
struct TypedHandler<T> {
    queue_name: String,
    run: Arc<BoxedRun<T>>,
}

impl<T> JobHandler for TypedHandler<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        let queue = self.queue_name.clone();
        let run = self.run.clone();
        let job_id = job.id;
        let attempt = job.retry_count + 1;
        let payload = job.payload.clone();

        Box::pin(async move {
            let started = Instant::now();
            tracing::info!(queue = %queue, job_id = %job_id, attempt, "job started");

            let outcome = match serde_json::from_value::<T>(payload) {
                Ok(data) => run(data).await,
                Err(e) => Err(format!("payload does not match '{}': {}", queue, e)),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(()) => {
                    tracing::info!(queue = %queue, job_id = %job_id, elapsed_ms, "job completed");
                    Ok(JobResult::new("ok"))
                }
                Err(error) => {
                    tracing::error!(
                        queue = %queue,
                        job_id = %job_id,
                        elapsed_ms,
                        error = %error,
                        "job failed"
                    );
                    Err(error)
                }
            }
        })
    }
}
