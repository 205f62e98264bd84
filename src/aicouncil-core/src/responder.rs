//! AI responders: the capability each participant's model is reached through.
//!
//! All three supported vendors expose an OpenAI-compatible chat endpoint, so a
//! single async-openai backed responder serves every provider.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::{ChatTurn, TurnRole};
use crate::error::CouncilError;
use crate::participant::{Participant, Provider};

const DEFAULT_TEMPERATURE: f32 = 0.7;
const MAX_RETRIES: u32 = 3;

/// Sampling parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Participant overrides win; otherwise the conversation's response length caps output.
    pub fn for_participant(participant: &Participant, response_length: u32) -> Self {
        Self {
            temperature: participant
                .generation
                .temperature
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: participant.generation.max_tokens.unwrap_or(response_length),
        }
    }
}

/// A model endpoint able to produce the next turn.
#[async_trait]
pub trait AiResponder: Send + Sync {
    /// Check that the endpoint and credential work.
    async fn test_connection(&self) -> bool;

    /// Generate a reply for the given context.
    async fn send_message(
        &self,
        turns: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<String, CouncilError>;
}

/// Builds the responder for a participant's capability binding.
pub trait ResponderFactory: Send + Sync {
    fn responder_for(&self, participant: &Participant) -> Result<Arc<dyn AiResponder>, CouncilError>;
}

/// Default OpenAI-compatible endpoint for each provider.
pub fn default_api_base(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAI => "https://api.openai.com/v1",
        Provider::Anthropic => "https://api.anthropic.com/v1",
        Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
    }
}

/// Creates OpenAI-compatible responders from participant bindings.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry;

impl ResponderFactory for ProviderRegistry {
    fn responder_for(&self, participant: &Participant) -> Result<Arc<dyn AiResponder>, CouncilError> {
        let binding = &participant.binding;
        let api_key = binding
            .credential
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CouncilError::MissingCredential(participant.name.clone()))?;

        let api_base = binding
            .api_base
            .as_deref()
            .unwrap_or_else(|| default_api_base(binding.provider));

        Ok(Arc::new(OpenAiCompatibleResponder::new(
            api_base,
            api_key,
            &binding.model,
        )?))
    }
}

/// Chat-completions client for any OpenAI-compatible API.
pub struct OpenAiCompatibleResponder {
    client: Client<OpenAIConfig>,
    /// Model used by the connection test.
    probe_model: String,
}

impl OpenAiCompatibleResponder {
    pub fn new(api_base: &str, api_key: &str, probe_model: &str) -> Result<Self, CouncilError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                CouncilError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            probe_model: probe_model.to_string(),
        })
    }
}

#[async_trait]
impl AiResponder for OpenAiCompatibleResponder {
    async fn test_connection(&self) -> bool {
        let request = match CreateChatCompletionRequestArgs::default()
            .model(&self.probe_model)
            .max_completion_tokens(5u32)
            .messages(to_request_messages(&[ChatTurn::user("ping")]))
            .build()
        {
            Ok(request) => request,
            Err(_) => return false,
        };

        match self.client.chat().create(request).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "connection test failed");
                false
            }
        }
    }

    async fn send_message(
        &self,
        turns: &[ChatTurn],
        model: &str,
        params: GenerationParams,
    ) -> Result<String, CouncilError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .temperature(params.temperature)
            .max_completion_tokens(params.max_tokens)
            .messages(to_request_messages(turns))
            .build()?;

        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                let delay = Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    let sanitized = sanitize_response(&content);
                    if sanitized.is_empty() {
                        return Err(CouncilError::ResponderError(format!(
                            "{} returned an empty response",
                            model
                        )));
                    }
                    return Ok(sanitized);
                }
                Err(e) => {
                    warn!(model, attempt = attempt + 1, error = %e, "chat completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map(CouncilError::from).unwrap_or_else(|| {
            CouncilError::ResponderError("Unknown API error after retries".to_string())
        }))
    }
}

fn to_request_messages(turns: &[ChatTurn]) -> Vec<ChatCompletionRequestMessage> {
    turns
        .iter()
        .map(|turn| match turn.role {
            TurnRole::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: turn.content.clone().into(),
                    name: None,
                })
            }
            TurnRole::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: turn.content.clone().into(),
                name: None,
            }),
            TurnRole::Assistant => {
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(turn.content.clone().into()),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        })
        .collect()
}

static REASONING_TAGS: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratch",
        "scratchpad",
        "plan",
        "analysis",
        "analyze",
        "consider",
        "pondering",
        "deliberation",
    ]
    .iter()
    .filter_map(|tag| regex::Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag)).ok())
    .collect()
});

static ORPHAN_TAG: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"</?[\w]+[^>]*>").ok());

static WHITESPACE: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"\s+").ok());

/// Strip reasoning blocks, stray tags, emphasis markers and redundant whitespace.
pub fn sanitize_response(response: &str) -> String {
    let mut result = response.to_string();

    for re in REASONING_TAGS.iter() {
        result = re.replace_all(&result, "").to_string();
    }

    if let Some(re) = ORPHAN_TAG.as_ref() {
        result = re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Some(re) = WHITESPACE.as_ref() {
        result = re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<thinking>Let me think about this...</thinking>The answer is 42.";
        assert_eq!(sanitize_response(input), "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_multiline_tags() {
        let input = "<think>\nMultiple\nlines\n</think>Final **answer** here.";
        assert_eq!(sanitize_response(input), "Final answer here.");
    }

    #[test]
    fn test_sanitize_response_nested_content() {
        let input = "Start <think>nested <inner>tags</inner> content</think> end";
        let output = sanitize_response(input);
        assert!(!output.contains('<'));
        assert!(!output.contains('>'));
    }

    #[test]
    fn test_sanitize_response_multiple_tag_types() {
        let input = "<plan>First plan</plan>Then <reasoning>reason</reasoning> finally the answer.";
        assert_eq!(sanitize_response(input), "Then finally the answer.");
    }

    #[test]
    fn test_generation_params_defaults() {
        let p = Participant::new("a", "A", Provider::OpenAI, "gpt-4o");
        let params = GenerationParams::for_participant(&p, 300);
        assert_eq!(params.max_tokens, 300);
        assert!((params.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_generation_params_overrides() {
        let mut p = Participant::new("a", "A", Provider::OpenAI, "gpt-4o");
        p.generation.temperature = Some(1.1);
        p.generation.max_tokens = Some(80);
        let params = GenerationParams::for_participant(&p, 300);
        assert_eq!(params.max_tokens, 80);
        assert!((params.temperature - 1.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_registry_requires_credential() {
        let p = Participant::new("a", "Aria", Provider::Anthropic, "claude-sonnet-4-20250514");
        let err = ProviderRegistry.responder_for(&p).err().unwrap();
        assert!(matches!(err, CouncilError::MissingCredential(name) if name == "Aria"));
    }

    #[test]
    fn test_registry_builds_responder() {
        let p = Participant::new("g", "Gem", Provider::Google, "gemini-2.5-flash")
            .with_credential("key");
        assert!(ProviderRegistry.responder_for(&p).is_ok());
    }

    #[test]
    fn test_request_message_roles() {
        let turns = vec![
            ChatTurn::system("sys"),
            ChatTurn::user("hi"),
            ChatTurn::assistant("hello"),
        ];
        let messages = to_request_messages(&turns);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
    }
}
