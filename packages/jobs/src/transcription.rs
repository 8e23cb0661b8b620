//! Voice message transcription, driven by inbound chat events.
//!
//! Every event is claimed through the idempotency gate before anything else
//! happens, so redelivered events never produce a second reply.

use std::sync::Arc;

use api::IdempotencyGate;
use db::DbError;

use crate::services::{ChatClient, RoomSettingsStore, ServiceError, Transcriber};

pub const ENABLE_COMMAND: &str = "!devEnableTranscription";
pub const DISABLE_COMMAND: &str = "!devDisableTranscription";
const ACK_REACTION: &str = "✅";

/// Body of an inbound room message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text { body: String },
    Audio { url: String },
    Other,
}

/// An inbound timeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub event_id: Option<String>,
    pub room_id: Option<String>,
    pub sender: Option<String>,
    pub content: MessageContent,
}

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Already handled by an earlier delivery.
    Duplicate,
    /// Nothing to do for this event.
    Ignored,
    TranscriptionEnabled,
    TranscriptionDisabled,
    Transcribed { text: String },
    /// Transcription failed; the event stays claimed.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Idempotency gate failed: {0}")]
    Gate(#[from] DbError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub struct TranscriptionPipeline {
    gate: IdempotencyGate,
    chat: Arc<dyn ChatClient>,
    rooms: Arc<dyn RoomSettingsStore>,
    transcriber: Arc<dyn Transcriber>,
}

impl TranscriptionPipeline {
    pub fn new(
        gate: IdempotencyGate,
        chat: Arc<dyn ChatClient>,
        rooms: Arc<dyn RoomSettingsStore>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            gate,
            chat,
            rooms,
            transcriber,
        }
    }

    pub async fn handle(&self, event: &RoomEvent) -> Result<Outcome, PipelineError> {
        let Some(event_id) = event.event_id.as_deref() else {
            return Ok(Outcome::Ignored);
        };

        if self.gate.claim(event_id).await?.already_claimed {
            return Ok(Outcome::Duplicate);
        }

        match &event.content {
            MessageContent::Text { body } => self.handle_command(event, event_id, body).await,
            MessageContent::Audio { url } => self.handle_audio(event, event_id, url).await,
            MessageContent::Other => Ok(Outcome::Ignored),
        }
    }

    async fn handle_command(
        &self,
        event: &RoomEvent,
        event_id: &str,
        body: &str,
    ) -> Result<Outcome, PipelineError> {
        let (Some(room_id), Some(_)) = (event.room_id.as_deref(), event.sender.as_deref()) else {
            return Ok(Outcome::Ignored);
        };

        let (enabled, outcome) = match body {
            ENABLE_COMMAND => (true, Outcome::TranscriptionEnabled),
            DISABLE_COMMAND => (false, Outcome::TranscriptionDisabled),
            _ => return Ok(Outcome::Ignored),
        };

        self.rooms.set_transcription(room_id, enabled).await?;
        self.chat.react(room_id, event_id, ACK_REACTION).await?;

        tracing::info!(room_id = %room_id, enabled, "Transcription setting changed");
        Ok(outcome)
    }

    async fn handle_audio(
        &self,
        event: &RoomEvent,
        event_id: &str,
        content_url: &str,
    ) -> Result<Outcome, PipelineError> {
        let Some(room_id) = event.room_id.as_deref() else {
            return Ok(Outcome::Ignored);
        };

        let enabled = self
            .rooms
            .get(room_id)
            .await?
            .is_some_and(|s| s.transcription_enabled);
        if !enabled {
            tracing::debug!(room_id = %room_id, "Transcription is disabled for room");
            return Ok(Outcome::Ignored);
        }

        let Some(sender) = event.sender.as_deref() else {
            return Ok(Outcome::Ignored);
        };
        let Some(speaker) = self.chat.user_display_name(sender).await else {
            return Ok(Outcome::Ignored);
        };
        let Some(audio_url) = self.chat.media_url(content_url).await else {
            return Ok(Outcome::Ignored);
        };

        tracing::info!(event_id = %event_id, room_id = %room_id, speaker = %speaker, "Transcribing voice message");

        let text = match self.transcriber.transcribe(&audio_url).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Transcription failed");
                return Ok(Outcome::Failed);
            }
        };

        let mut details = serde_json::Map::new();
        details.insert("transcription".into(), serde_json::Value::String(text.clone()));
        details.insert("userDisplayName".into(), serde_json::Value::String(speaker));
        if let Err(e) = self.gate.annotate(event_id, details).await {
            tracing::error!(event_id = %event_id, error = %e, "Failed to record transcription");
            return Ok(Outcome::Failed);
        }

        if text.is_empty() {
            return Ok(Outcome::Transcribed { text });
        }

        self.chat
            .send_reply(
                room_id,
                event_id,
                &format!("Transkrypcja:\n{}", text),
                &format!("<strong>Transkrypcja</strong>:\n{}", text),
            )
            .await?;

        Ok(Outcome::Transcribed { text })
    }
}
