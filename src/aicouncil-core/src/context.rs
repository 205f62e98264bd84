//! Per-speaker context assembly.
//!
//! Every other participant's words are presented to the current speaker as
//! user turns prefixed with the speaker's name, so a single-speaker chat API
//! can take part in a multi-party room.

use serde::{Deserialize, Serialize};

use crate::message::{Message, Sender};
use crate::participant::{CharacterPersona, Participant, PersonaProfile};
use crate::style::ConversationStyle;

const UNKNOWN_SPEAKER: &str = "AI";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

/// One role-tagged entry of the context sent to a responder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// Build the full context for `current`: one system turn followed by the projected history.
pub fn build_turns(
    history: &[Message],
    current: &Participant,
    roster: &[Participant],
    style: ConversationStyle,
) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    turns.push(ChatTurn::system(system_prompt(current, roster, style)));

    for message in history {
        match &message.sender {
            Sender::User => turns.push(ChatTurn::user(message.content.clone())),
            Sender::Ai { participant_id } if *participant_id == current.id => {
                turns.push(ChatTurn::assistant(message.content.clone()));
            }
            Sender::Ai { participant_id } => {
                let speaker = roster
                    .iter()
                    .find(|p| p.id == *participant_id)
                    .map(|p| p.name.as_str())
                    .unwrap_or(UNKNOWN_SPEAKER);
                turns.push(ChatTurn::user(format!("{} says: {}", speaker, message.content)));
            }
        }
    }

    turns
}

/// System instruction identifying the speaker, the room, the style and the voice.
pub fn system_prompt(
    participant: &Participant,
    roster: &[Participant],
    style: ConversationStyle,
) -> String {
    let name = &participant.name;
    let others = roster
        .iter()
        .filter(|p| p.id != participant.id)
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let intro = if others.is_empty() {
        format!("You are {}.", name)
    } else {
        format!("You are {} in a conversation with {}.", name, others)
    };

    let personality = match &participant.profile {
        PersonaProfile::Persona(persona) => persona_block(persona),
        PersonaProfile::Generic { personality } => {
            format!("PERSONALITY: {}", personality.trait_sentence())
        }
    };

    format!(
        r#"{intro}

CRITICAL: This is a TURN-BASED conversation. You speak ONLY as {name}. DO NOT simulate or write responses for other participants. Wait for them to respond in their own turns.

{directive}

{personality}

RULES:
- 2-4 sentences MAX. Brevity is power.
- Strong takes. No hedging. No "well, it depends."
- React to what was just said - quote it, flip it, build on it
- Be witty when you can. Boring = banned.
- Skip the formalities. Jump straight to the point.
- One killer idea per response
- NEVER prefix your response with your name or format it like "{name}:"
- Just respond naturally as yourself

Make it punchy. Make it count."#,
        intro = intro,
        name = name,
        directive = style.directive(),
        personality = personality,
    )
}

fn persona_block(persona: &CharacterPersona) -> String {
    let mut block = format!(
        "CHARACTER: You are {}. {}\n\nKEY TRAITS: {}",
        persona.name,
        persona.description,
        persona.traits.join(", ")
    );

    if let Some(style) = &persona.speaking_style {
        block.push_str(&format!("\nSPEAKING STYLE: {}", style));
    }
    if !persona.catchphrases.is_empty() {
        block.push_str(&format!("\nFAMOUS PHRASES: {}", persona.catchphrases.join(" | ")));
    }
    if !persona.mannerisms.is_empty() {
        block.push_str(&format!(
            "\nMANNERISMS & QUIRKS: {}",
            persona.mannerisms.join(", ")
        ));
    }

    block.push_str(
        "\n\nCRITICAL: Fully embody this character. Use their speaking style, reference their way of thinking, and incorporate their characteristic phrases naturally. Stay in character at all times. Don't just describe them - BE them.",
    );
    block
}
