//! Actor system for the job queue engine.
//!
//! This crate provides the Ractor-based engine that dispatches jobs from the
//! store to registered handlers.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor that owns queue actors, schedules and maintenance
//! - `QueueActor` - Serialises one queue's transitions and owns its workers
//! - `WorkerActor` - Polls its queue and runs the handler
//! - `Engine` - Cloneable handle application code talks to
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Engine, EngineConfig, job_handler};
//!
//! let engine = Engine::start(db, EngineConfig::default()).await?;
//!
//! engine.work("email", job_handler!(|job| {
//!     tracing::info!(job_id = %job.id, "sending");
//!     Ok(JobResult::new("sent"))
//! })).await?;
//!
//! engine.send("email", json!({ "to": "a@b.c" }), JobOptions::default()).await?;
//! ```

mod config;
mod engine;
mod error;
mod handler;
mod messages;
mod queue_actor;
mod supervisor;
mod worker_actor;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler};
pub use messages::{MaintenanceReport, QueueMessage, SupervisorMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorState};
pub use supervisor::Supervisor;
pub use worker_actor::WorkerActor;

#[doc(hidden)]
pub use queue_core;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
