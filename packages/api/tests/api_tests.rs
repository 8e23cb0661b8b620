#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api::{
    AppConfig, IdempotencyGate, JobDefinition, JobError, JobEvent, JobOptions, JobState,
    QueueConfig, init_job_queue,
};
use db::DbConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;

use common::{start_engine, wait_for};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomMessage {
    room_id: String,
    message: String,
}

fn room_message() -> RoomMessage {
    RoomMessage {
        room_id: "!abc".into(),
        message: "hi".into(),
    }
}

#[tokio::test]
async fn test_emit_then_work() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;
    let mut events = engine.subscribe();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let definition = JobDefinition::new(engine.clone(), "scheduleMessage", move |msg: RoomMessage| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(msg);
            Ok::<(), String>(())
        }
    });

    let id = definition.emit(room_message()).await?;

    // Nobody works the queue yet.
    let live = definition.get_jobs().await?;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, id);
    assert_eq!(live[0].state, JobState::Created);
    assert_eq!(live[0].data, room_message());

    let stored = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(stored.payload, json!({ "roomId": "!abc", "message": "hi" }));

    definition.work().await?;
    wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never completed")?;

    assert_eq!(*received.lock().unwrap(), vec![room_message()]);
    assert!(definition.get_jobs().await?.is_empty());
    let finished = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(finished.state, JobState::Completed);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_emit_failed_on_singleton_conflict() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;

    let definition = JobDefinition::new(engine.clone(), "syncLidlReceipts", |_: ()| async {
        Ok::<(), String>(())
    })
    .with_defaults(JobOptions {
        singleton_key: Some("sync".into()),
        ..JobOptions::delayed(60)
    });

    definition.emit(()).await?;
    let second = definition.emit(()).await;
    assert!(matches!(second, Err(JobError::EmitFailed(name)) if name == "syncLidlReceipts"));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_through_definition() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;

    let definition = JobDefinition::new(engine.clone(), "scheduleMessage", |_: RoomMessage| async {
        Ok::<(), String>(())
    });

    let id = definition
        .emit_with(room_message(), JobOptions::delayed(3600))
        .await?;
    assert!(definition.cancel(id).await?);
    assert!(!definition.cancel(id).await?);
    assert!(definition.get_jobs().await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_foreign_payload_is_rejected() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;
    let mut events = engine.subscribe();

    let no_retry = QueueConfig::default().with_retry(0, 0, false);
    engine.create_queue("scheduleMessage", no_retry.clone()).await?;
    let definition = JobDefinition::new(engine.clone(), "scheduleMessage", |_: RoomMessage| async {
        Ok::<(), String>(())
    })
    .with_queue_config(no_retry);

    // Someone bypassed the definition.
    let id = engine
        .send("scheduleMessage", json!({ "unexpected": true }), JobOptions::default())
        .await?
        .ok_or("no job id")?;

    assert!(matches!(definition.get_jobs().await, Err(JobError::Payload(_))));

    definition.work().await?;
    let event = wait_for(&mut events, |e| matches!(e, JobEvent::JobFailed { job_id, .. } if *job_id == id))
        .await
        .ok_or("job never failed")?;
    match event {
        JobEvent::JobFailed { error, will_retry, .. } => {
            assert!(error.contains("payload does not match"));
            assert!(!will_retry);
        }
        other => panic!("unexpected event {:?}", other),
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_job_leaves_get_jobs() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;
    let mut events = engine.subscribe();

    let definition = JobDefinition::new(engine.clone(), "enableLidlCoupons", |_: ()| async {
        Err::<(), String>("loyalty api down".into())
    })
    .with_queue_config(QueueConfig::default().with_retry(0, 0, false));
    definition.work().await?;

    let id = definition.emit(()).await?;
    wait_for(&mut events, |e| {
        matches!(e, JobEvent::JobFailed { job_id, will_retry: false, .. } if *job_id == id)
    })
    .await
    .ok_or("job never failed")?;

    let stored = engine.get_job(id).await?.ok_or("missing job")?;
    assert_eq!(stored.state, JobState::Failed);
    assert!(definition.get_jobs().await?.is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_definition_inherits_engine_timezone() -> Result<(), Box<dyn Error>> {
    let mut config = AppConfig::default();
    config.engine = config
        .engine
        .with_cron_interval(Duration::from_secs(3600))
        .with_timezone(chrono_tz::Europe::Warsaw);
    let engine = init_job_queue(&config).await?;

    let definition = JobDefinition::new(engine.clone(), "syncLidlReceipts", |_: ()| async {
        Ok::<(), String>(())
    });
    let schedule = definition.schedule("5 * * * *", ()).await?;
    assert_eq!(schedule.timezone, "Europe/Warsaw");

    let direct = engine
        .schedule("scheduleNotification", "0 10 * * *", None, api::ScheduleOptions::default())
        .await?;
    assert_eq!(direct.timezone, "Europe/Warsaw");

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_schedule_uses_definition_timezone() -> Result<(), Box<dyn Error>> {
    let engine = start_engine().await?;

    let definition = JobDefinition::new(engine.clone(), "scheduleNotification", |_: ()| async {
        Ok::<(), String>(())
    })
    .with_timezone(chrono_tz::Europe::Warsaw);

    let schedule = definition.schedule("0 10 * * *", ()).await?;
    assert_eq!(schedule.timezone, "Europe/Warsaw");

    let override_zone = definition
        .schedule_with("0 10 * * *", (), api::ScheduleOptions::in_timezone("UTC"))
        .await?;
    assert_eq!(override_zone.timezone, "UTC");
    assert_eq!(engine.schedules().await?.len(), 1);

    assert!(definition.unschedule().await?);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_gate_single_winner() -> Result<(), Box<dyn Error>> {
    let db = db::init(DbConfig::memory()).await?;
    let gate = IdempotencyGate::new(db);

    let (a, b) = tokio::join!(gate.claim("$event:1"), gate.claim("$event:1"));
    let (a, b) = (a?, b?);
    assert_ne!(a.already_claimed, b.already_claimed);

    assert!(gate.claim("$event:1").await?.already_claimed);
    assert!(gate.is_claimed("$event:1").await?);
    assert!(!gate.is_claimed("$event:2").await?);

    let mut details = serde_json::Map::new();
    details.insert("transcription".into(), json!("hello"));
    gate.annotate("$event:1", details).await?;

    let mut more = serde_json::Map::new();
    more.insert("speaker".into(), json!("Ala"));
    let marker = gate.annotate("$event:1", more).await?;
    assert_eq!(marker.details.get("transcription"), Some(&json!("hello")));
    assert_eq!(marker.details.get("speaker"), Some(&json!("Ala")));

    Ok(())
}

#[tokio::test]
async fn test_init_tracing_is_idempotent() {
    api::init_tracing();
    api::init_tracing();
}
