//! End-of-conversation summary and winner, written by one of the participants.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::context::ChatTurn;
use crate::message::{Message, Sender};
use crate::participant::Participant;
use crate::responder::{GenerationParams, ResponderFactory};

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 1500;

/// Summary of a finished conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub summary: String,
    pub winner: String,
}

impl ConversationSummary {
    fn new(summary: &str, winner: &str) -> Self {
        Self {
            summary: summary.to_string(),
            winner: winner.to_string(),
        }
    }
}

static SUMMARY_SECTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)SUMMARY:\s*(.*?)(?:WINNER:|$)").ok());

static WINNER_SECTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)WINNER:\s*(.*)$").ok());

/// Ask the first active participant with a credential to summarize the AI turns.
pub async fn generate_summary(
    transcript: &[Message],
    roster: &[Participant],
    responders: &dyn ResponderFactory,
) -> ConversationSummary {
    if !transcript.iter().any(Message::is_ai) {
        return ConversationSummary::new(
            "No discussion took place.",
            "No winner - no messages exchanged.",
        );
    }

    let Some(analyst) = roster
        .iter()
        .find(|p| p.is_active && p.binding.credential.as_deref().is_some_and(|k| !k.is_empty()))
    else {
        return ConversationSummary::new(
            "Summary generation requires an active AI participant with API key.",
            "Unable to determine winner without AI analysis.",
        );
    };

    let prompt = summary_prompt(transcript, roster);
    let params = GenerationParams {
        temperature: SUMMARY_TEMPERATURE,
        max_tokens: SUMMARY_MAX_TOKENS,
    };

    info!(participant = %analyst.name, "generating conversation summary");
    let result = match responders.responder_for(analyst) {
        Ok(responder) => {
            responder
                .send_message(&[ChatTurn::user(prompt)], &analyst.binding.model, params)
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => parse_summary(&response),
        Err(e) => {
            warn!(error = %e, "summary generation failed");
            ConversationSummary::new(
                "Error generating summary. Please try again.",
                "Unable to determine winner due to an error.",
            )
        }
    }
}

fn summary_prompt(transcript: &[Message], roster: &[Participant]) -> String {
    let topic = transcript
        .iter()
        .find(|m| m.sender == Sender::User)
        .map(|m| m.content.as_str())
        .unwrap_or("Unknown topic");

    let lines = transcript
        .iter()
        .filter_map(|m| {
            let id = m.participant_id()?;
            let name = roster
                .iter()
                .find(|p| p.id == id)
                .map(|p| p.name.as_str())
                .unwrap_or("AI");
            Some(format!("{}: {}", name, m.content))
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let names = roster
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are analyzing an AI council discussion. Here is the information:

Topic: {topic}

Participants: {names}

Full Transcript:
{lines}

Please provide:
1. A comprehensive summary of the discussion (3-5 paragraphs covering key points, arguments, and conclusions)
2. Declare a winner based on who made the most compelling arguments, showed the best reasoning, and contributed most meaningfully to the discussion

Format your response exactly as:
SUMMARY:
[Your summary here]

WINNER:
[Winner name and explanation here]"#
    )
}

/// Split a reply on its `SUMMARY:` and `WINNER:` markers.
pub fn parse_summary(response: &str) -> ConversationSummary {
    let summary = SUMMARY_SECTION
        .as_ref()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| response.trim().to_string());

    let winner = WINNER_SECTION
        .as_ref()
        .and_then(|re| re.captures(response))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "Unable to determine a clear winner.".to_string());

    ConversationSummary { summary, winner }
}
