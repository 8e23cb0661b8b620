#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    Actor, EngineError, FnHandler, HandlerFuture, QueueActor, QueueActorState, QueueMessage,
    job_handler,
};
use chrono::{TimeZone, Utc};
use db::DbConfig;
use db::repositories::JobRepository;
use queue_core::{
    Job, JobEvent, JobOptions, JobResult, JobState, Queue, QueueConfig, ScheduleOptions,
};
use ractor::rpc::CallResult;
use serde_json::json;

use common::{start_engine, start_engine_with, test_config, wait_for};

fn failing_handler(attempts: Arc<AtomicUsize>) -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(move |_job: &Job| -> HandlerFuture {
        let attempts = attempts.clone();
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        })
    })
}

#[tokio::test]
async fn test_handler_receives_payload() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine
        .work(
            "scheduleMessage",
            FnHandler::new(move |job: &Job| -> HandlerFuture {
                let sink = sink.clone();
                let payload = job.payload.clone();
                Box::pin(async move {
                    sink.lock().unwrap().push(payload);
                    Ok(JobResult::new("sent"))
                })
            }),
        )
        .await?;

    let payload = json!({ "roomId": "!abc", "message": "hi" });
    let id = engine
        .send("scheduleMessage", payload.clone(), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never completed")?;

    assert_eq!(*seen.lock().unwrap(), vec![payload]);
    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Completed);
    assert!(engine.jobs("scheduleMessage", &JobState::LIVE).await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_retry_bound() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let attempts = Arc::new(AtomicUsize::new(0));
    engine
        .work_with_config(
            "flaky",
            Some(QueueConfig::default().with_retry(2, 0, false)),
            Arc::new(failing_handler(attempts.clone())),
        )
        .await?;

    let id = engine
        .send("flaky", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    wait_for(&mut events, |e| {
        matches!(e, JobEvent::JobFailed { job_id, will_retry: false, .. } if *job_id == id)
    })
    .await
    .ok_or("job never failed for good")?;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.retry_count, 2);
    assert!(engine.jobs("flaky", &JobState::LIVE).await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_delay_honored() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let dispatched = Arc::new(Mutex::new(None));
    let sink = dispatched.clone();
    engine
        .work(
            "later",
            FnHandler::new(move |_job: &Job| -> HandlerFuture {
                let sink = sink.clone();
                Box::pin(async move {
                    *sink.lock().unwrap() = Some(Utc::now());
                    Ok(JobResult::new("done"))
                })
            }),
        )
        .await?;

    let id = engine
        .send("later", json!(null), JobOptions::delayed(1))
        .await?
        .ok_or("no job id")?;
    let job = engine.get_job(id).await?.ok_or("missing job")?;

    wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never completed")?;

    let at = dispatched.lock().unwrap().ok_or("never dispatched")?;
    assert!(at >= job.start_after);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_job() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let id = engine
        .send("reminders", json!(1), JobOptions::delayed(60))
        .await?
        .ok_or("no job id")?;
    assert_eq!(engine.jobs("reminders", &JobState::LIVE).await?.len(), 1);

    assert!(!engine.cancel("elsewhere", id).await?);
    assert!(engine.cancel("reminders", id).await?);
    assert!(!engine.cancel("reminders", id).await?);

    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Cancelled);
    assert!(engine.jobs("reminders", &JobState::LIVE).await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_races_dispatch() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    engine
        .work(
            "race",
            FnHandler::new(move |_job: &Job| -> HandlerFuture {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(JobResult::new("done"))
                })
            }),
        )
        .await?;

    let id = engine
        .send("race", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;
    let cancelled = engine.cancel("race", id).await?;

    if cancelled {
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let job = engine.get_job(id).await?.ok_or("missing job")?;
        assert_eq!(job.state, JobState::Cancelled);
    } else {
        wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { job_id, .. } if *job_id == id))
            .await
            .ok_or("job never completed")?;
        let job = engine.get_job(id).await?.ok_or("missing job")?;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_singleton_key() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let options = JobOptions {
        singleton_key: Some("daily".into()),
        ..JobOptions::delayed(60)
    };

    let first = engine.send("digest", json!(1), options.clone()).await?;
    let second = engine.send("digest", json!(2), options.clone()).await?;
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(engine.jobs("digest", &JobState::LIVE).await?.len(), 1);

    // Once the owner is terminal the key is free again.
    engine.cancel("digest", first.ok_or("no job id")?).await?;
    assert!(engine.send("digest", json!(3), options).await?.is_some());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_schedule_fires_once_per_occurrence() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let payload = Some(json!({ "kind": "coupons" }));
    engine
        .schedule("enableLidlCoupons", "5 * * * *", payload.clone(), ScheduleOptions::default())
        .await?;
    // Registering again replaces, not duplicates.
    engine
        .schedule("enableLidlCoupons", "5 * * * *", payload, ScheduleOptions::default())
        .await?;
    assert_eq!(engine.schedules().await?.len(), 1);

    let tick = Utc.with_ymd_and_hms(2024, 3, 4, 10, 5, 20).single().ok_or("bad date")?;
    let sent = engine.run_cron(tick).await?;
    assert_eq!(sent.len(), 1);

    let again = engine.run_cron(tick + chrono::Duration::seconds(20)).await?;
    assert!(again.is_empty());

    let off_minute = engine.run_cron(tick + chrono::Duration::minutes(30)).await?;
    assert!(off_minute.is_empty());

    let jobs = engine.jobs("enableLidlCoupons", &JobState::LIVE).await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload, json!({ "kind": "coupons" }));

    assert!(engine.unschedule("enableLidlCoupons").await?);
    assert!(engine.schedules().await?.is_empty());
    assert!(!engine.unschedule("enableLidlCoupons").await?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_schedule_rejects_bad_cron() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let result = engine
        .schedule("q", "not a cron", None, ScheduleOptions::default())
        .await;
    assert!(matches!(result, Err(EngineError::InvalidSchedule(_))));

    let result = engine
        .schedule("q", "0 10 * * *", None, ScheduleOptions::in_timezone("Nowhere/City"))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidSchedule(_))));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_maintenance_expires_stuck_jobs() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    engine
        .work(
            "stuck",
            job_handler!(|job| {
                let _ = job;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(JobResult::new("late"))
            }),
        )
        .await?;

    let id = engine
        .send("stuck", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    wait_for(&mut events, |e| matches!(e, JobEvent::JobStarted { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never started")?;

    let report = engine
        .run_maintenance(Utc::now() + chrono::Duration::hours(1))
        .await?;
    assert_eq!(report.expired, 1);

    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Retry);
    assert_eq!(job.retry_count, 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_maintenance_archives_finished_jobs() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let id = engine
        .send("archive", json!({}), JobOptions::delayed(60))
        .await?
        .ok_or("no job id")?;
    engine.cancel("archive", id).await?;

    let report = engine
        .run_maintenance(Utc::now() + chrono::Duration::days(15))
        .await?;
    assert_eq!(report.archived, 1);
    assert!(engine.get_job(id).await?.is_none());

    engine.shutdown().await;
    Ok(())
}

async fn explode() -> actors::HandlerResult {
    panic!("handler blew up")
}

#[tokio::test]
async fn test_handler_panic_is_failure() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    engine
        .work_with_config(
            "panicky",
            Some(QueueConfig::default().with_retry(0, 0, false)),
            Arc::new(FnHandler::new(|_job: &Job| -> HandlerFuture { Box::pin(explode()) })),
        )
        .await?;

    let id = engine
        .send("panicky", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    let event = wait_for(&mut events, |e| matches!(e, JobEvent::JobFailed { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never failed")?;
    match event {
        JobEvent::JobFailed { error, will_retry, .. } => {
            assert_eq!(error, "handler panicked");
            assert!(!will_retry);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let stats = engine.queue_stats("panicky").await?;
    assert_eq!(stats.failed, 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_second_work_rejected() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    let attempts = Arc::new(AtomicUsize::new(0));
    assert_eq!(engine.work("once", failing_handler(attempts.clone())).await?, 1);

    let again = engine.work("once", failing_handler(attempts)).await;
    assert!(matches!(again, Err(EngineError::HandlerAlreadyRegistered(name)) if name == "once"));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_create_queue_is_idempotent() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let created = engine
        .create_queue("coupons", QueueConfig::default().with_retry(5, 1, true))
        .await?;
    assert_eq!(created.config.retry_limit, 5);

    wait_for(&mut events, |e| matches!(e, JobEvent::QueueCreated { queue, .. } if queue.name == "coupons"))
        .await
        .ok_or("no queue event")?;

    // A second create keeps the stored config.
    let existing = engine.create_queue("coupons", QueueConfig::default()).await?;
    assert_eq!(existing.config.retry_limit, 5);

    let stored = engine.get_queue("coupons").await?.ok_or("missing queue")?;
    assert!(stored.config.retry_backoff);

    // Jobs take the queue's policy.
    let id = engine
        .send("coupons", json!({}), JobOptions::delayed(60))
        .await?
        .ok_or("no job id")?;
    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.retry_limit, 5);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_queue_without_auto_create() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine_with(test_config().with_auto_create_queues(false)).await?;

    let result = engine.send("ghost", json!({}), JobOptions::default()).await;
    assert!(matches!(result, Err(EngineError::QueueNotFound(name)) if name == "ghost"));
    assert!(engine.get_queue("ghost").await?.is_none());

    engine.create_queue("ghost", QueueConfig::default()).await?;
    let id = engine.send("ghost", json!({}), JobOptions::default()).await?;
    assert!(id.is_some());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_calls_after_shutdown_fail() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    engine.shutdown().await;

    let result = engine.send("q", json!({}), JobOptions::default()).await;
    assert!(matches!(result, Err(EngineError::Shutdown)));
    Ok(())
}

fn instant_handler() -> FnHandler<impl Fn(&Job) -> HandlerFuture + Send + Sync + 'static> {
    FnHandler::new(|_job: &Job| -> HandlerFuture { Box::pin(async { Ok(JobResult::new("done")) }) })
}

#[tokio::test]
async fn test_handler_timeout_is_failure() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let slow = FnHandler::new(|_job: &Job| -> HandlerFuture {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(JobResult::new("too late"))
        })
    });
    engine
        .work_with_config(
            "slow",
            Some(QueueConfig::default().with_retry(0, 0, false).with_expire_in(1)),
            Arc::new(slow),
        )
        .await?;

    let id = engine
        .send("slow", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    let event = wait_for(&mut events, |e| matches!(e, JobEvent::JobFailed { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never failed")?;
    match event {
        JobEvent::JobFailed { error, will_retry, .. } => {
            assert_eq!(error, "job timed out after 1s");
            assert!(!will_retry);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Failed);
    assert!(engine.jobs("slow", &JobState::LIVE).await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_zero_concurrency_runs_one_worker() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;
    let mut events = engine.subscribe();

    let config = QueueConfig {
        concurrency: 0,
        ..QueueConfig::default()
    };
    let workers = engine
        .work_with_config("zero", Some(config), Arc::new(instant_handler()))
        .await?;
    assert_eq!(workers, 1);

    let id = engine
        .send("zero", json!({}), JobOptions::default())
        .await?
        .ok_or("no job id")?;
    wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never dispatched")?;

    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.state, JobState::Completed);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_update_queue_reconfigures_live_queue() -> Result<(), Box<dyn Error>> {
    let (engine, _db) = start_engine().await?;

    engine.create_queue("coupons", QueueConfig::default().with_retry(5, 0, false)).await?;
    engine.create_queue("receipts", QueueConfig::default()).await?;

    let updated = engine
        .update_queue(
            Queue::new("coupons")
                .with_description("loyalty coupons")
                .with_config(QueueConfig::default().with_retry(1, 30, true)),
        )
        .await?;
    assert_eq!(updated.config.retry_limit, 1);
    assert_eq!(updated.description.as_deref(), Some("loyalty coupons"));

    // Sends after the update take the new policy.
    let id = engine
        .send("coupons", json!({}), JobOptions::delayed(60))
        .await?
        .ok_or("no job id")?;
    let job = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(job.retry_limit, 1);
    assert_eq!(job.retry_delay_secs, 30);
    assert!(job.retry_backoff);

    let mut names: Vec<String> = engine.list_queues().await?.into_iter().map(|q| q.name).collect();
    names.sort();
    assert_eq!(names, vec!["coupons".to_string(), "receipts".to_string()]);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_claim_for_departed_worker_is_released() -> Result<(), Box<dyn Error>> {
    let db = db::init(DbConfig::memory()).await?;
    let jobs = JobRepository::new(db);
    let (event_tx, _) = tokio::sync::broadcast::channel(16);
    let state = QueueActorState::new(Queue::new("q"), jobs.clone(), Duration::from_secs(3600), event_tx);
    let (queue, handle) = Actor::spawn(None, QueueActor, state).await?;

    let job = Job::new("q", json!({}));
    jobs.insert(&job).await?;

    // The requester hangs up before the queue answers.
    let (tx, rx) = ractor::concurrency::oneshot();
    drop(rx);
    queue.send_message(QueueMessage::RequestJob {
        worker_id: "q-worker-gone".into(),
        reply: tx.into(),
    })?;

    // With one slot, the next request only gets the job if it was handed back.
    let answer = ractor::rpc::call(
        &queue,
        |reply| QueueMessage::RequestJob {
            worker_id: "q-worker-1".into(),
            reply,
        },
        None,
    )
    .await?;
    let CallResult::Success(Some(next)) = answer else {
        return Err("claim was not released".into());
    };
    assert_eq!(next.id, job.id);
    assert_eq!(next.retry_count, 0);
    assert_eq!(next.state, JobState::Active);

    queue.send_message(QueueMessage::Shutdown)?;
    handle.await?;
    Ok(())
}
