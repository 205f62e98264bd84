//! Speaker selection policies.
//!
//! Decides which participant speaks next from the transcript and the active
//! roster. Selection never touches the transcript; randomness comes from an
//! injectable generator so tests can seed it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::message::{last_ai_turn, Message};
use crate::participant::{Participant, PersonaProfile};
use crate::settings::TurnMode;

const NAME_MENTION_SCORE: u32 = 10;
const PERSONA_NAME_SCORE: u32 = 5;
const TRAIT_SCORE: u32 = 3;
const KEYWORD_SCORE: u32 = 2;
const QUESTION_SCORE: u32 = 1;
const MAX_JITTER: f64 = 3.0;

/// Picks the next speaker for each cycle.
pub struct SpeakerSelector {
    rng: StdRng,
    manual_next: Option<String>,
}

impl Default for SpeakerSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerSelector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            manual_next: None,
        }
    }

    /// Selector with a reproducible random source.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            manual_next: None,
        }
    }

    /// Register the speaker for the next manual-mode selection. Consumed once.
    pub fn set_manual_next_speaker(&mut self, participant_id: impl Into<String>) {
        self.manual_next = Some(participant_id.into());
    }

    /// Select the next speaker, or `None` when nobody should speak yet.
    pub fn select_next<'a>(
        &mut self,
        history: &[Message],
        roster: &'a [Participant],
        mode: TurnMode,
    ) -> Option<&'a Participant> {
        if roster.is_empty() {
            return None;
        }

        match mode {
            TurnMode::Sequential => Some(next_sequential(history, roster)),
            TurnMode::Random => {
                let eligible = eligible_speakers(history, roster);
                let idx = self.rng.gen_range(0..eligible.len());
                Some(eligible[idx])
            }
            TurnMode::Contextual => self.next_contextual(history, roster),
            TurnMode::Manual => {
                let wanted = self.manual_next.take()?;
                roster.iter().find(|p| p.id == wanted)
            }
        }
    }

    fn next_contextual<'a>(
        &mut self,
        history: &[Message],
        roster: &'a [Participant],
    ) -> Option<&'a Participant> {
        let eligible = eligible_speakers(history, roster);
        if eligible.len() == 1 {
            return Some(eligible[0]);
        }

        let last_text = last_ai_turn(history)
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();

        let mut best: Option<(&'a Participant, f64)> = None;
        for participant in eligible {
            let jitter = self.rng.gen_range(0.0..MAX_JITTER);
            let score = contextual_score(participant, &last_text) as f64 + jitter;
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((participant, score));
            }
        }

        best.map(|(p, _)| p)
    }
}

fn next_sequential<'a>(history: &[Message], roster: &'a [Participant]) -> &'a Participant {
    let last_speaker = last_ai_turn(history).and_then(Message::participant_id);

    let Some(last_id) = last_speaker else {
        return &roster[0];
    };

    match roster.iter().position(|p| p.id == last_id) {
        Some(idx) => &roster[(idx + 1) % roster.len()],
        // Previous speaker left the roster; restart from the top.
        None => &roster[0],
    }
}

/// Roster minus the previous speaker, unless that would leave nobody.
fn eligible_speakers<'a>(history: &[Message], roster: &'a [Participant]) -> Vec<&'a Participant> {
    if roster.len() <= 1 {
        return roster.iter().collect();
    }

    let last_speaker = last_ai_turn(history).and_then(Message::participant_id);
    let eligible: Vec<&Participant> = roster
        .iter()
        .filter(|p| Some(p.id.as_str()) != last_speaker)
        .collect();

    if eligible.is_empty() {
        roster.iter().collect()
    } else {
        eligible
    }
}

/// Deterministic part of the contextual score against lower-cased text.
///
/// Names, traits and keywords match whole words only; multi-word entries
/// match as a phrase.
pub fn contextual_score(participant: &Participant, last_text: &str) -> u32 {
    if last_text.is_empty() {
        return 0;
    }

    let text = words(last_text);
    let mut score = 0;

    if mentions(&text, &participant.name.to_lowercase()) {
        score += NAME_MENTION_SCORE;
    }

    match &participant.profile {
        PersonaProfile::Persona(persona) => {
            if mentions(&text, &persona.name.to_lowercase()) {
                score += PERSONA_NAME_SCORE;
            }
            for trait_name in &persona.traits {
                if mentions(&text, &trait_name.to_lowercase()) {
                    score += TRAIT_SCORE;
                }
            }
        }
        PersonaProfile::Generic { personality } => {
            for keyword in personality.keywords() {
                if mentions(&text, keyword) {
                    score += KEYWORD_SCORE;
                }
            }
        }
    }

    if last_text.contains('?') {
        score += QUESTION_SCORE;
    }

    score
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn mentions(text: &[&str], phrase: &str) -> bool {
    let needle = words(phrase);
    !needle.is_empty() && text.windows(needle.len()).any(|w| w == needle.as_slice())
}
