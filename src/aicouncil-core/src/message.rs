//! Turn records making up the conversation transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai { participant_id: String },
}

/// Progress of talking-head generation for a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Generating,
    Completed,
    Failed,
}

/// A single contribution to the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    /// Round in which this turn was spoken.
    pub round: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_status: Option<MediaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, round: u32) -> Self {
        Self::new(Sender::User, content.into(), round)
    }

    pub fn ai(participant_id: impl Into<String>, content: impl Into<String>, round: u32) -> Self {
        Self::new(
            Sender::Ai {
                participant_id: participant_id.into(),
            },
            content.into(),
            round,
        )
    }

    fn new(sender: Sender, content: String, round: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            content,
            round,
            created_at: Utc::now(),
            video_status: None,
            audio_ref: None,
            video_ref: None,
            avatar_ref: None,
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self.sender, Sender::Ai { .. })
    }

    pub fn participant_id(&self) -> Option<&str> {
        match &self.sender {
            Sender::Ai { participant_id } => Some(participant_id),
            Sender::User => None,
        }
    }

    /// Copy media results onto this turn. Absent references leave existing ones untouched.
    pub fn attach_media(&mut self, media: &MediaAttachment) {
        if media.video_status.is_some() {
            self.video_status = media.video_status;
        }
        if let Some(audio) = &media.audio_ref {
            self.audio_ref = Some(audio.clone());
        }
        if let Some(video) = &media.video_ref {
            self.video_ref = Some(video.clone());
        }
        if let Some(avatar) = &media.avatar_ref {
            self.avatar_ref = Some(avatar.clone());
        }
    }
}

/// Media produced for a turn by the side-effect pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaAttachment {
    pub video_status: Option<MediaStatus>,
    pub audio_ref: Option<String>,
    pub video_ref: Option<String>,
    pub avatar_ref: Option<String>,
}

impl MediaAttachment {
    pub fn is_empty(&self) -> bool {
        *self == MediaAttachment::default()
    }
}

/// Most recent AI turn in the history, if any.
pub fn last_ai_turn(history: &[Message]) -> Option<&Message> {
    history.iter().rev().find(|m| m.is_ai())
}
