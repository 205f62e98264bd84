//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CouncilError;
use crate::participant::{CharacterPersona, GenerationConfig, Participant, Personality, Provider};
use crate::settings::{ConversationSettings, Timings, TurnMode};
use crate::style::ConversationStyle;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub timings: TimingsConfig,
    #[serde(default)]
    pub voices: VoicesConfig,
    #[serde(default)]
    pub video: Option<VideoConfig>,
    #[serde(default)]
    pub participants: Vec<ParticipantConfig>,
}

/// The `[settings]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub turn_mode: TurnMode,
    pub style: ConversationStyle,
    pub max_rounds: u32,
    pub response_length: u32,
    pub auto_play_voice: bool,
    pub talking_heads: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        let defaults = ConversationSettings::default();
        Self {
            turn_mode: defaults.turn_mode,
            style: defaults.style,
            max_rounds: defaults.max_rounds,
            response_length: defaults.response_length,
            auto_play_voice: defaults.auto_play_voice,
            talking_heads: defaults.talking_heads,
        }
    }
}

/// The `[timings]` table, in milliseconds. Missing keys keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    pub start_delay: Option<u64>,
    pub resume_delay: Option<u64>,
    pub turn_delay: Option<u64>,
    pub error_backoff: Option<u64>,
    pub silent_pacing: Option<u64>,
    pub after_speech: Option<u64>,
    pub after_video: Option<u64>,
}

impl TimingsConfig {
    pub fn to_timings(&self) -> Timings {
        let defaults = Timings::default();
        let pick = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };

        Timings {
            start_delay: pick(self.start_delay, defaults.start_delay),
            resume_delay: pick(self.resume_delay, defaults.resume_delay),
            turn_delay: pick(self.turn_delay, defaults.turn_delay),
            error_backoff: pick(self.error_backoff, defaults.error_backoff),
            silent_pacing: pick(self.silent_pacing, defaults.silent_pacing),
            after_speech: pick(self.after_speech, defaults.after_speech),
            after_video: pick(self.after_video, defaults.after_video),
        }
    }
}

/// Voice configuration for TTS.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Kokoro voice for participants without a usable voice hint.
    pub default_voice: String,
    pub speech_rate: f32,
    /// Where rendered speech is written.
    pub output_dir: PathBuf,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            default_voice: "af_sky".to_string(),
            speech_rate: 0.9,
            output_dir: PathBuf::from("recordings"),
        }
    }
}

/// The `[video]` table for talking heads.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_video_key_env")]
    pub api_key_env: String,
    /// URL under which `asset_dir` is reachable by the video service.
    pub public_base_url: String,
    #[serde(default = "default_asset_dir")]
    pub asset_dir: PathBuf,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_video_key_env() -> String {
    "REPLICATE_API_TOKEN".to_string()
}

fn default_asset_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_poll_attempts() -> u32 {
    120
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl VideoConfig {
    pub fn resolve_api_key(&self) -> Result<String, CouncilError> {
        resolve_secret(self.api_key.as_deref(), Some(&self.api_key_env)).ok_or_else(|| {
            CouncilError::ConfigError(format!(
                "talking heads need an API token (set {})",
                self.api_key_env
            ))
        })
    }
}

/// One `[[participants]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub personality: Personality,
    #[serde(default)]
    pub persona: Option<CharacterPersona>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ParticipantConfig {
    /// Build the runtime participant, reading the credential from the environment if needed.
    pub fn to_participant(&self, index: usize) -> Participant {
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", index + 1, slug(&self.name)));

        let mut participant = Participant::new(id, &self.name, self.provider, &self.model);
        participant = match &self.persona {
            Some(persona) => participant.with_persona(persona.clone()),
            None => participant.with_personality(self.personality),
        };

        let env_name = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| default_key_env(self.provider).to_string());
        participant.binding.credential = resolve_secret(self.api_key.as_deref(), Some(&env_name));
        participant.binding.api_base = self.api_base.clone();
        participant.generation = GenerationConfig {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        participant.voice = self.voice.clone();
        participant.avatar = self.avatar.clone();
        participant.is_active = self.active;
        participant
    }
}

/// Environment variable consulted when a participant gives no key.
pub fn default_key_env(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GEMINI_API_KEY",
    }
}

fn resolve_secret(inline: Option<&str>, env_name: Option<&str>) -> Option<String> {
    inline
        .filter(|key| !key.is_empty())
        .map(String::from)
        .or_else(|| env_name.and_then(|name| std::env::var(name).ok()))
        .filter(|key| !key.is_empty())
}

fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CouncilError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CouncilError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, CouncilError> {
        toml::from_str(content)
            .map_err(|e| CouncilError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            turn_mode: self.settings.turn_mode,
            style: self.settings.style,
            max_rounds: self.settings.max_rounds,
            response_length: self.settings.response_length,
            auto_play_voice: self.settings.auto_play_voice,
            talking_heads: self.settings.talking_heads,
            timings: self.timings.to_timings(),
        }
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .enumerate()
            .map(|(i, p)| p.to_participant(i))
            .collect()
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Config {
        settings: SettingsConfig::default(),
        timings: TimingsConfig::default(),
        voices: VoicesConfig::default(),
        video: None,
        participants: Vec::new(),
    })
}

const DEFAULT_CONFIG: &str = r#"
[settings]
turn_mode = "sequential"
style = "discussion"
max_rounds = 3
response_length = 500
auto_play_voice = true

[voices]
default_voice = "af_sky"
speech_rate = 0.9

[[participants]]
id = "analyst"
name = "Nova"
provider = "openai"
model = "gpt-4o-mini"
personality = "analytical"
voice = "nova"

[[participants]]
id = "dreamer"
name = "Echo"
provider = "openai"
model = "gpt-4o-mini"
personality = "creative"
voice = "echo"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::PersonaProfile;

    #[test]
    fn test_default_config_has_two_participants() {
        let config = default_config();
        let roster = config.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, "analyst");
        assert_eq!(
            roster[1].profile,
            PersonaProfile::Generic {
                personality: Personality::Creative
            }
        );
        assert_eq!(config.settings.max_rounds, 3);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[settings]
turn_mode = "contextual"
style = "debate"
max_rounds = 2
talking_heads = true

[timings]
turn_delay = 0
error_backoff = 250

[video]
api_key = "r8_token"
public_base_url = "https://cdn.example.org"

[[participants]]
name = "Albert Einstein"
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key = "sk-inline"
temperature = 0.9
avatar = "portraits/einstein.png"

[participants.persona]
name = "Albert Einstein"
description = "Theoretical physicist"
traits = ["curious", "playful"]
catchphrases = ["Imagination is more important than knowledge."]
voice_hint = "onyx"

[[participants]]
name = "Gem"
provider = "gemini"
model = "gemini-2.5-flash"
api_key = "g-key"
active = false
"#;
        let config = Config::from_str(toml).unwrap();
        let settings = config.conversation_settings();
        assert_eq!(settings.turn_mode, TurnMode::Contextual);
        assert_eq!(settings.style, ConversationStyle::Debate);
        assert!(settings.talking_heads);
        assert_eq!(settings.response_length, 500);
        assert_eq!(settings.timings.turn_delay, Duration::ZERO);
        assert_eq!(settings.timings.error_backoff, Duration::from_millis(250));
        assert_eq!(settings.timings.start_delay, Duration::from_millis(1000));

        let roster = config.roster();
        assert_eq!(roster[0].id, "1-albert-einstein");
        assert_eq!(roster[0].binding.credential.as_deref(), Some("sk-inline"));
        assert_eq!(roster[0].generation.temperature, Some(0.9));
        assert_eq!(roster[0].voice_hint(), Some("onyx"));
        assert_eq!(roster[0].avatar_image(), Some("portraits/einstein.png"));
        assert!(roster[0].persona().is_some());
        assert_eq!(roster[1].binding.provider, Provider::Google);
        assert!(!roster[1].is_active);

        let video = config.video.unwrap();
        assert_eq!(video.resolve_api_key().unwrap(), "r8_token");
        assert_eq!(video.poll_attempts, 120);
    }

    #[test]
    fn test_api_key_from_env() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("AICOUNCIL_TEST_KEY_7F3A", "from-env") };
        let toml = r#"
[[participants]]
name = "Env"
provider = "openai"
model = "gpt-4o"
api_key_env = "AICOUNCIL_TEST_KEY_7F3A"
"#;
        let roster = Config::from_str(toml).unwrap().roster();
        assert_eq!(roster[0].binding.credential.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_bad_config_is_config_error() {
        let err = Config::from_str("[settings]\nturn_mode = \"chaos\"").unwrap_err();
        assert!(matches!(err, CouncilError::ConfigError(_)));
    }
}
