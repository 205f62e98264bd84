//! Conversation settings read by the driver on every cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CouncilError;
use crate::style::ConversationStyle;

/// Policy deciding who speaks next.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    #[default]
    Sequential,
    Random,
    Contextual,
    Manual,
}

impl TurnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnMode::Sequential => "sequential",
            TurnMode::Random => "random",
            TurnMode::Contextual => "contextual",
            TurnMode::Manual => "manual",
        }
    }
}

impl fmt::Display for TurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnMode {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(TurnMode::Sequential),
            "random" => Ok(TurnMode::Random),
            "contextual" => Ok(TurnMode::Contextual),
            "manual" => Ok(TurnMode::Manual),
            other => Err(CouncilError::ConfigError(format!(
                "Unknown turn mode: '{}'. Available modes: sequential, random, contextual, manual",
                other
            ))),
        }
    }
}

/// Pacing delays used by the driver and the side-effect pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Before the first cycle, so the topic renders first.
    pub start_delay: Duration,
    /// Before the cycle that follows a resume or an implicit resume.
    pub resume_delay: Duration,
    /// Between an accepted turn and the next cycle.
    pub turn_delay: Duration,
    /// Between an errored turn and the next cycle.
    pub error_backoff: Duration,
    /// Stand-in for speech when voice is off or fails.
    pub silent_pacing: Duration,
    pub after_speech: Duration,
    pub after_video: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(1000),
            resume_delay: Duration::from_millis(1000),
            turn_delay: Duration::from_millis(100),
            error_backoff: Duration::from_millis(2000),
            silent_pacing: Duration::from_millis(1500),
            after_speech: Duration::from_millis(500),
            after_video: Duration::from_millis(500),
        }
    }
}

impl Timings {
    /// No pacing at all.
    pub fn immediate() -> Self {
        Self {
            start_delay: Duration::ZERO,
            resume_delay: Duration::ZERO,
            turn_delay: Duration::ZERO,
            error_backoff: Duration::ZERO,
            silent_pacing: Duration::ZERO,
            after_speech: Duration::ZERO,
            after_video: Duration::ZERO,
        }
    }
}

/// Settings for running a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSettings {
    pub turn_mode: TurnMode,
    pub style: ConversationStyle,
    /// Rounds before the conversation stops on its own; 0 runs until stopped.
    pub max_rounds: u32,
    /// Token cap for each response.
    pub response_length: u32,
    pub auto_play_voice: bool,
    pub talking_heads: bool,
    pub timings: Timings,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            turn_mode: TurnMode::Sequential,
            style: ConversationStyle::Discussion,
            max_rounds: 0,
            response_length: 500,
            auto_play_voice: true,
            talking_heads: false,
            timings: Timings::default(),
        }
    }
}

impl ConversationSettings {
    /// Whether another turn is allowed after `responses` turns with `active` participants.
    pub fn should_continue(&self, responses: u32, active: usize) -> bool {
        self.max_rounds == 0 || (responses as u64) < self.max_rounds as u64 * active as u64
    }
}
