//! AI Council Core Library
//!
//! Provides the conversation driver, speaker selection, context assembly,
//! AI responders and the speech/video side-effect pipeline.

pub mod assets;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod participant;
pub mod pipeline;
pub mod responder;
pub mod selection;
pub mod settings;
pub mod style;
pub mod summary;
pub mod tts;
pub mod video;

pub use error::CouncilError;
pub use message::{MediaAttachment, MediaStatus, Message, Sender};
pub use orchestrator::{
    ConversationController, ConversationDriver, ConversationEvent, ConversationHandle,
    ConversationState,
};
pub use participant::{CharacterPersona, Participant, PersonaProfile, Personality, Provider};
pub use pipeline::SideEffectPipeline;
pub use responder::{AiResponder, ProviderRegistry, ResponderFactory};
pub use selection::SpeakerSelector;
pub use settings::{ConversationSettings, Timings, TurnMode};
pub use style::ConversationStyle;
pub use summary::{ConversationSummary, generate_summary};
