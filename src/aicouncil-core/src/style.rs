//! Conversation styles and the prompt directives attached to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CouncilError;

/// Posture the council takes towards each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStyle {
    #[default]
    Discussion,
    Debate,
    Consensus,
    Questioning,
}

impl ConversationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStyle::Discussion => "discussion",
            ConversationStyle::Debate => "debate",
            ConversationStyle::Consensus => "consensus",
            ConversationStyle::Questioning => "questioning",
        }
    }

    /// Directive block inserted into every speaker's system prompt.
    pub fn directive(&self) -> &'static str {
        match self {
            ConversationStyle::Discussion => {
                "DISCUSSION MODE: Add spice. Build on ideas in unexpected ways."
            }
            ConversationStyle::Debate => {
                "DEBATE MODE: Be sharp. Challenge ideas directly. Make your point land hard."
            }
            ConversationStyle::Consensus => {
                "CONSENSUS MODE: Find what connects the ideas. Bridge disagreements with insight."
            }
            ConversationStyle::Questioning => {
                "QUESTIONING MODE: Drop thought bombs as questions. Make people rethink everything."
            }
        }
    }
}

impl fmt::Display for ConversationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStyle {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discussion" => Ok(ConversationStyle::Discussion),
            "debate" => Ok(ConversationStyle::Debate),
            "consensus" => Ok(ConversationStyle::Consensus),
            "questioning" => Ok(ConversationStyle::Questioning),
            other => Err(CouncilError::ConfigError(format!(
                "Unknown conversation style: '{}'. Available styles: {}",
                other,
                available_styles().join(", ")
            ))),
        }
    }
}

/// List all available style names.
pub fn available_styles() -> Vec<&'static str> {
    vec!["discussion", "debate", "consensus", "questioning"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_are_distinct() {
        let styles = [
            ConversationStyle::Discussion,
            ConversationStyle::Debate,
            ConversationStyle::Consensus,
            ConversationStyle::Questioning,
        ];
        for (i, a) in styles.iter().enumerate() {
            for b in &styles[i + 1..] {
                assert_ne!(a.directive(), b.directive());
            }
        }
    }

    #[test]
    fn test_style_from_str_unknown() {
        let err = "shouting".parse::<ConversationStyle>().unwrap_err();
        assert!(err.to_string().contains("discussion"));
    }
}
