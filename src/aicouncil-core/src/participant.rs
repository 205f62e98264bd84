//! AI Participant definitions.
//!
//! Represents individual council members with their provider binding,
//! persona and generation parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CouncilError;

/// Provider backing a participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    #[serde(alias = "gemini")]
    Google,
}

impl Provider {
    pub fn display_name(&self) -> &str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
        }
    }
}

impl FromStr for Provider {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            other => Err(CouncilError::UnknownProvider(other.to_string())),
        }
    }
}

/// Conversational personality used when a participant has no persona.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    #[default]
    Analytical,
    Creative,
    Sarcastic,
    Enthusiastic,
    Skeptical,
    Philosophical,
    Pragmatic,
    Witty,
}

impl Personality {
    pub const ALL: [Personality; 8] = [
        Personality::Analytical,
        Personality::Creative,
        Personality::Sarcastic,
        Personality::Enthusiastic,
        Personality::Skeptical,
        Personality::Philosophical,
        Personality::Pragmatic,
        Personality::Witty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Personality::Analytical => "analytical",
            Personality::Creative => "creative",
            Personality::Sarcastic => "sarcastic",
            Personality::Enthusiastic => "enthusiastic",
            Personality::Skeptical => "skeptical",
            Personality::Philosophical => "philosophical",
            Personality::Pragmatic => "pragmatic",
            Personality::Witty => "witty",
        }
    }

    /// One-line voice description placed in the system prompt.
    pub fn trait_sentence(&self) -> &'static str {
        match self {
            Personality::Analytical => {
                "You dissect arguments with precision. Data and logic are your weapons."
            }
            Personality::Creative => {
                "You think sideways. Connect dots others miss. Make wild leaps work."
            }
            Personality::Sarcastic => "Your wit has bite. Call out BS with humor. Keep it clever.",
            Personality::Enthusiastic => {
                "You bring energy. Hype up good ideas. Make boring topics pop."
            }
            Personality::Skeptical => {
                "You question everything. Poke holes. Demand proof. Stay critical."
            }
            Personality::Philosophical => {
                "You zoom out. Find deeper meaning. Connect to bigger ideas."
            }
            Personality::Pragmatic => "You cut to what works. Real solutions only. No fluff.",
            Personality::Witty => {
                "You weaponize humor. Drop zingers. Make serious points hilariously."
            }
        }
    }

    /// Words that suggest the last speaker is inviting this personality in.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Personality::Analytical => &["data", "evidence", "logic", "numbers", "research", "proof"],
            Personality::Creative => &["imagine", "idea", "art", "invent", "possibility", "dream"],
            Personality::Sarcastic => &["obviously", "sure", "brilliant", "genius", "ironic", "totally"],
            Personality::Enthusiastic => &["amazing", "exciting", "love", "awesome", "fantastic", "incredible"],
            Personality::Skeptical => &["doubt", "really", "claim", "unlikely", "prove", "assume"],
            Personality::Philosophical => &["meaning", "truth", "existence", "purpose", "ethics", "nature"],
            Personality::Pragmatic => &["practical", "cost", "works", "solution", "implement", "realistic"],
            Personality::Witty => &["funny", "joke", "laugh", "irony", "clever", "humor"],
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Personality {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Personality::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| CouncilError::ConfigError(format!("Unknown personality: '{}'", s)))
    }
}

/// A character overlay that replaces the generic personality voice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CharacterPersona {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub speaking_style: Option<String>,
    #[serde(default)]
    pub catchphrases: Vec<String>,
    #[serde(default)]
    pub mannerisms: Vec<String>,
    /// Preferred voice (e.g. "onyx", "nova") for speech synthesis.
    #[serde(default)]
    pub voice_hint: Option<String>,
    /// Portrait used for talking-head generation.
    #[serde(default)]
    pub avatar: Option<String>,
}

/// How a participant presents itself in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum PersonaProfile {
    Generic { personality: Personality },
    Persona(CharacterPersona),
}

impl Default for PersonaProfile {
    fn default() -> Self {
        PersonaProfile::Generic {
            personality: Personality::default(),
        }
    }
}

/// Provider, model and opaque credential used to reach a participant's model.
#[derive(Debug, Clone)]
pub struct CapabilityBinding {
    pub provider: Provider,
    pub model: String,
    pub credential: Option<String>,
    /// Override for the provider's default OpenAI-compatible endpoint.
    pub api_base: Option<String>,
}

/// Sampling parameters for a participant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// An AI participant in the council.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    /// Display name for this participant.
    pub name: String,
    pub binding: CapabilityBinding,
    pub profile: PersonaProfile,
    pub generation: GenerationConfig,
    /// Voice used for plain speech playback.
    pub voice: Option<String>,
    /// Portrait chosen for this participant, takes precedence over the persona's.
    pub avatar: Option<String>,
    pub is_active: bool,
    pub message_count: u32,
}

impl Participant {
    /// Create a new active participant with a generic personality.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: Provider,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            binding: CapabilityBinding {
                provider,
                model: model.into(),
                credential: None,
                api_base: None,
            },
            profile: PersonaProfile::default(),
            generation: GenerationConfig::default(),
            voice: None,
            avatar: None,
            is_active: true,
            message_count: 0,
        }
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.profile = PersonaProfile::Generic { personality };
        self
    }

    pub fn with_persona(mut self, persona: CharacterPersona) -> Self {
        self.profile = PersonaProfile::Persona(persona);
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.binding.credential = Some(credential.into());
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    pub fn persona(&self) -> Option<&CharacterPersona> {
        match &self.profile {
            PersonaProfile::Persona(persona) => Some(persona),
            PersonaProfile::Generic { .. } => None,
        }
    }

    /// Portrait for talking heads: the participant's own, else the persona's.
    pub fn avatar_image(&self) -> Option<&str> {
        self.avatar
            .as_deref()
            .or_else(|| self.persona().and_then(|p| p.avatar.as_deref()))
    }

    /// Name used when speaking in character.
    pub fn character_name(&self) -> &str {
        self.persona().map(|p| p.name.as_str()).unwrap_or(&self.name)
    }

    /// Voice hint for synthesis, the persona's suggestion winning over the plain voice.
    pub fn voice_hint(&self) -> Option<&str> {
        self.persona()
            .and_then(|p| p.voice_hint.as_deref())
            .or(self.voice.as_deref())
    }
}
