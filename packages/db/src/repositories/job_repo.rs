//! Job repository: the durable job store.
//!
//! Every state transition is a conditional `UPDATE ... WHERE state IN [...]`.
//! A racer that loses observes an empty result and treats it as a no-op.

use chrono::{DateTime, Utc};
use queue_core::{FailureOutcome, Job, JobId, JobState, QueueStats};
use serde::{Deserialize, Serialize};

use super::{decode_json, encode_json, from_ms, from_opt_ms, to_ms};
use crate::{Database, DbError};

/// Candidates fetched per dispatch attempt.
const CLAIM_BATCH: i64 = 8;

const RETRY_ATTEMPT: &str = r#"
    UPDATE type::thing('job', $id)
    SET state = 'retry',
        retry_count = $retry_count,
        start_after_ms = $start_after,
        expire_on_ms = NONE,
        output = $output
    WHERE state = 'active' AND started_on_ms = $started
    RETURN AFTER
"#;

const FAIL_ATTEMPT: &str = r#"
    UPDATE type::thing('job', $id)
    SET state = 'failed',
        completed_on_ms = $now,
        expire_on_ms = NONE,
        output = $output
    WHERE state = 'active' AND started_on_ms = $started
    RETURN AFTER
"#;

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Stored shape of a job. The record id is the job UUID; `job_id` repeats it
/// so rows can be decoded without parsing record ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    job_id: String,
    queue_name: String,
    payload: String,
    state: JobState,
    priority: i64,
    retry_count: i64,
    retry_limit: i64,
    retry_delay_secs: i64,
    retry_backoff: bool,
    start_after_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_on_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expire_on_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    singleton_key: Option<String>,
    expire_in_secs: i64,
    created_on_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_on_ms: Option<i64>,
    keep_until_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    archived_on_ms: Option<i64>,
}

impl JobRecord {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            job_id: job.id.to_string(),
            queue_name: job.queue_name.clone(),
            payload: encode_json(&job.payload)?,
            state: job.state,
            priority: i64::from(job.priority),
            retry_count: i64::from(job.retry_count),
            retry_limit: i64::from(job.retry_limit),
            retry_delay_secs: clamp_i64(job.retry_delay_secs),
            retry_backoff: job.retry_backoff,
            start_after_ms: to_ms(job.start_after),
            started_on_ms: job.started_on.map(to_ms),
            expire_on_ms: job.expire_on.map(to_ms),
            singleton_key: job.singleton_key.clone(),
            expire_in_secs: clamp_i64(job.expire_in_secs),
            created_on_ms: to_ms(job.created_on),
            completed_on_ms: job.completed_on.map(to_ms),
            keep_until_ms: to_ms(job.keep_until),
            output: job.output.as_ref().map(encode_json).transpose()?,
            archived_on_ms: None,
        })
    }

    fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Serialization(format!("bad job id {}: {}", self.job_id, e)))?;

        Ok(Job {
            id,
            queue_name: self.queue_name,
            payload: decode_json(&self.payload)?,
            state: self.state,
            priority: narrow(self.priority)?,
            retry_count: narrow(self.retry_count)?,
            retry_limit: narrow(self.retry_limit)?,
            retry_delay_secs: narrow(self.retry_delay_secs)?,
            retry_backoff: self.retry_backoff,
            start_after: from_ms(self.start_after_ms)?,
            started_on: from_opt_ms(self.started_on_ms)?,
            expire_on: from_opt_ms(self.expire_on_ms)?,
            singleton_key: self.singleton_key,
            expire_in_secs: narrow(self.expire_in_secs)?,
            created_on: from_ms(self.created_on_ms)?,
            completed_on: from_opt_ms(self.completed_on_ms)?,
            keep_until: from_ms(self.keep_until_ms)?,
            output: self.output.as_deref().map(decode_json).transpose()?,
        })
    }
}

/// Owner of a singleton key within a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SingletonSlot {
    queue_name: String,
    singleton_key: String,
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StateCount {
    state: JobState,
    count: i64,
}

#[derive(Debug, Deserialize)]
struct RecordKey {
    job_id: String,
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn narrow<T: TryFrom<i64>>(value: i64) -> Result<T, DbError> {
    T::try_from(value).map_err(|_| DbError::Serialization(format!("value out of range: {}", value)))
}

fn slot_id(queue_name: &str, key: &str) -> String {
    format!("{}/{}", queue_name, key)
}

fn state_names(states: &[JobState]) -> Vec<&'static str> {
    states.iter().map(JobState::as_str).collect()
}

fn first_job(records: Vec<JobRecord>) -> Result<Option<Job>, DbError> {
    records.into_iter().next().map(JobRecord::into_job).transpose()
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new job.
    ///
    /// Returns `None` when the job carries a singleton key that a live job of
    /// the same queue already owns.
    pub async fn insert(&self, job: &Job) -> Result<Option<Job>, DbError> {
        if let Some(key) = &job.singleton_key {
            if !self.take_singleton_slot(job, key).await? {
                tracing::debug!(
                    queue = %job.queue_name,
                    singleton_key = %key,
                    "singleton key in use, job not created"
                );
                return Ok(None);
            }
        }

        let created: Result<Option<JobRecord>, surrealdb::Error> = self
            .db
            .create(("job", job.id.to_string()))
            .content(JobRecord::from_job(job)?)
            .await;

        match created {
            Ok(Some(record)) => Ok(Some(record.into_job()?)),
            Ok(None) => {
                self.release_singleton(job).await?;
                Err(DbError::Query(format!("Failed to create job {}", job.id)))
            }
            Err(err) => {
                self.release_singleton(job).await?;
                Err(err.into())
            }
        }
    }

    /// Claim the singleton slot for `job`, taking over stale slots once.
    async fn take_singleton_slot(&self, job: &Job, key: &str) -> Result<bool, DbError> {
        let id = slot_id(&job.queue_name, key);
        let slot = SingletonSlot {
            queue_name: job.queue_name.clone(),
            singleton_key: key.to_string(),
            job_id: job.id.to_string(),
        };

        for _ in 0..2 {
            let created: Result<Option<SingletonSlot>, surrealdb::Error> = self
                .db
                .create(("job_singleton", id.clone()))
                .content(slot.clone())
                .await;

            let err = match created {
                Ok(_) => return Ok(true),
                Err(err) => err,
            };

            let existing: Option<SingletonSlot> =
                self.db.select(("job_singleton", id.clone())).await?;
            let Some(existing) = existing else {
                // Slot vanished between the create and the read; try again.
                tracing::debug!(slot = %id, error = %err, "singleton slot create failed");
                continue;
            };

            let owner_live = match JobId::parse(&existing.job_id) {
                Ok(owner) => self
                    .get(owner)
                    .await?
                    .is_some_and(|owner| !owner.state.is_terminal()),
                Err(_) => false,
            };
            if owner_live {
                return Ok(false);
            }

            // Stale slot: drop it only if nobody replaced it meanwhile.
            self.db
                .query("DELETE type::thing('job_singleton', $id) WHERE job_id = $owner")
                .bind(("id", id.clone()))
                .bind(("owner", existing.job_id))
                .await?
                .check()?;
        }

        Ok(false)
    }

    /// Free the singleton slot held by `job`, if it holds one.
    async fn release_singleton(&self, job: &Job) -> Result<(), DbError> {
        let Some(key) = &job.singleton_key else {
            return Ok(());
        };

        self.db
            .query("DELETE type::thing('job_singleton', $id) WHERE job_id = $owner")
            .bind(("id", slot_id(&job.queue_name, key)))
            .bind(("owner", job.id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;

        record.map(JobRecord::into_job).transpose()
    }

    /// Get an archived job by ID.
    pub async fn get_archived(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let record: Option<JobRecord> = self.db.select(("job_archive", id.to_string())).await?;

        record.map(JobRecord::into_job).transpose()
    }

    /// Jobs of a queue in any of `states`, oldest first.
    pub async fn list(&self, queue_name: &str, states: &[JobState]) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE queue_name = $queue AND state IN $states
                ORDER BY created_on_ms ASC, job_id ASC
                "#,
            )
            .bind(("queue", queue_name.to_string()))
            .bind(("states", state_names(states)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Claim the next eligible job of a queue for execution.
    ///
    /// Eligible jobs are `created` or `retry` with `start_after <= now`,
    /// taken by earliest `start_after`, then highest priority, then age.
    pub async fn fetch_next(&self, queue_name: &str, now: DateTime<Utc>) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE queue_name = $queue AND state IN $states AND start_after_ms <= $now
                ORDER BY start_after_ms ASC, priority DESC, created_on_ms ASC, job_id ASC
                LIMIT $limit
                "#,
            )
            .bind(("queue", queue_name.to_string()))
            .bind(("states", state_names(&JobState::ELIGIBLE)))
            .bind(("now", to_ms(now)))
            .bind(("limit", CLAIM_BATCH))
            .await?;

        let candidates: Vec<RecordKey> = result.take(0)?;

        for candidate in candidates {
            if let Some(job) = self.claim(&candidate.job_id, now).await? {
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Move one eligible job to `active`. `None` if another claimer won.
    async fn claim(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<Job>, DbError> {
        let claimed = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = 'active',
                    started_on_ms = $now,
                    expire_on_ms = $now + expire_in_secs * 1000
                WHERE state IN $states AND start_after_ms <= $now
                RETURN AFTER
                "#,
            )
            .bind(("id", job_id.to_string()))
            .bind(("states", state_names(&JobState::ELIGIBLE)))
            .bind(("now", to_ms(now)))
            .await
            .and_then(|mut response| response.take::<Vec<JobRecord>>(0));

        match claimed {
            Ok(records) => first_job(records),
            Err(err) => {
                // A conflicting write is a lost race only if the job has left
                // the eligible states; anything else is a store failure.
                let current: Option<JobRecord> = self.db.select(("job", job_id.to_string())).await?;
                let still_eligible = current
                    .map(JobRecord::into_job)
                    .transpose()?
                    .is_some_and(|job| job.is_eligible(now));
                if still_eligible {
                    return Err(err.into());
                }
                tracing::debug!(job_id = %job_id, error = %err, "claim lost");
                Ok(None)
            }
        }
    }

    /// Return a claimed job nobody started to the state it was claimed from.
    ///
    /// The retry count is untouched, so the attempt is not used up. `None`
    /// when the job already left that attempt.
    pub async fn release(&self, attempt: &Job) -> Result<Option<Job>, DbError> {
        let previous = if attempt.retry_count > 0 {
            JobState::Retry
        } else {
            JobState::Created
        };

        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = $state, started_on_ms = NONE, expire_on_ms = NONE
                WHERE state = 'active' AND started_on_ms = $started
                RETURN AFTER
                "#,
            )
            .bind(("id", attempt.id.to_string()))
            .bind(("state", previous.as_str()))
            .bind(("started", attempt.started_on.map(to_ms)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        first_job(records)
    }

    /// Mark the attempt `attempt` describes completed.
    ///
    /// `None` when the job left that attempt meanwhile (cancelled, expired,
    /// or claimed again after expiry).
    pub async fn complete(
        &self,
        attempt: &Job,
        output: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = 'completed', completed_on_ms = $now, output = $output
                WHERE state = 'active' AND started_on_ms = $started
                RETURN AFTER
                "#,
            )
            .bind(("id", attempt.id.to_string()))
            .bind(("now", to_ms(now)))
            .bind(("started", attempt.started_on.map(to_ms)))
            .bind(("output", output.as_ref().map(encode_json).transpose()?))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        let job = first_job(records)?;

        if let Some(job) = &job {
            self.release_singleton(job).await?;
        }

        Ok(job)
    }

    /// Record a failure of the attempt `attempt` describes, moving the job to
    /// `retry` or `failed` according to its retry policy.
    pub async fn fail(
        &self,
        attempt: &Job,
        error: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        if attempt.state != JobState::Active {
            return Ok(None);
        }
        self.fail_attempt(attempt, error, now).await
    }

    /// Fail the attempt `job` describes. The update only applies while the
    /// stored job is still in that same attempt.
    async fn fail_attempt(
        &self,
        job: &Job,
        error: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        let (query, retry_count, start_after) = match job.failure_outcome(now) {
            FailureOutcome::Retry {
                retry_count,
                start_after,
            } => (RETRY_ATTEMPT, retry_count, start_after),
            FailureOutcome::Failed => (FAIL_ATTEMPT, job.retry_count, job.start_after),
        };

        let mut result = self
            .db
            .query(query)
            .bind(("id", job.id.to_string()))
            .bind(("retry_count", i64::from(retry_count)))
            .bind(("start_after", to_ms(start_after)))
            .bind(("now", to_ms(now)))
            .bind(("started", job.started_on.map(to_ms)))
            .bind(("output", encode_json(&error)?))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        let updated = first_job(records)?;

        if let Some(updated) = &updated {
            if updated.state.is_terminal() {
                self.release_singleton(updated).await?;
            }
        }

        Ok(updated)
    }

    /// Cancel a pending job. `None` if it was not in a cancellable state.
    pub async fn cancel(
        &self,
        queue_name: &str,
        id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DbError> {
        let cancelled = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET state = 'cancelled', completed_on_ms = $now
                WHERE state IN $states AND queue_name = $queue
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("queue", queue_name.to_string()))
            .bind(("states", state_names(&JobState::CANCELLABLE)))
            .bind(("now", to_ms(now)))
            .await
            .and_then(|mut response| response.take::<Vec<JobRecord>>(0));

        let job = match cancelled {
            Ok(records) => first_job(records)?,
            Err(err) => {
                // Lost a write race; only an error if the job is still cancellable.
                match self.get(id).await? {
                    Some(job)
                        if job.queue_name == queue_name
                            && JobState::CANCELLABLE.contains(&job.state) =>
                    {
                        return Err(err.into());
                    }
                    _ => None,
                }
            }
        };

        if let Some(job) = &job {
            self.release_singleton(job).await?;
        }

        Ok(job)
    }

    /// Fail every active job of a queue whose attempt outlived `expire_on`.
    ///
    /// Returns the jobs after the transition.
    pub async fn expire_active(&self, queue_name: &str, now: DateTime<Utc>) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE queue_name = $queue AND state = 'active' AND expire_on_ms < $now
                "#,
            )
            .bind(("queue", queue_name.to_string()))
            .bind(("now", to_ms(now)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        let mut expired = Vec::new();

        for record in records {
            let job = record.into_job()?;
            let error = serde_json::json!({ "message": "job expired" });
            if let Some(updated) = self.fail_attempt(&job, error, now).await? {
                expired.push(updated);
            }
        }

        Ok(expired)
    }

    /// Per-state job counts for a queue.
    pub async fn stats(&self, queue_name: &str) -> Result<QueueStats, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT state, count() AS count
                FROM job
                WHERE queue_name = $queue
                GROUP BY state
                "#,
            )
            .bind(("queue", queue_name.to_string()))
            .await?;

        let counts: Vec<StateCount> = result.take(0)?;

        let mut stats = QueueStats::default();
        for count in counts {
            stats.record(count.state, u64::try_from(count.count).unwrap_or(0));
        }

        Ok(stats)
    }

    /// Move terminal jobs whose `keep_until` passed into the archive.
    ///
    /// Returns the number of archived jobs.
    pub async fn archive_completed(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE state IN $states AND keep_until_ms < $now
                "#,
            )
            .bind(("states", state_names(&JobState::TERMINAL)))
            .bind(("now", to_ms(now)))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        let mut archived = 0;

        for mut record in records {
            let id = record.job_id.clone();
            record.archived_on_ms = Some(to_ms(now));

            let _: Option<JobRecord> = self
                .db
                .upsert(("job_archive", id.clone()))
                .content(record)
                .await?;

            self.db
                .query("DELETE type::thing('job', $id) WHERE state IN $states")
                .bind(("id", id))
                .bind(("states", state_names(&JobState::TERMINAL)))
                .await?
                .check()?;

            archived += 1;
        }

        Ok(archived)
    }

    /// Delete archived jobs archived before `before`. Returns how many.
    pub async fn prune_archive(&self, before: DateTime<Utc>) -> Result<usize, DbError> {
        let mut result = self
            .db
            .query("DELETE job_archive WHERE archived_on_ms < $before RETURN BEFORE")
            .bind(("before", to_ms(before)))
            .await?;

        let deleted: Vec<RecordKey> = result.take(0)?;

        Ok(deleted.len())
    }
}
