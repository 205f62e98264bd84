//! Post-response side effects: speech and talking-head video.
//!
//! The pipeline never fails from the caller's point of view. Any failing step
//! drops to a cheaper path: video falls back to plain speech, and speech
//! falls back to a fixed pause so the conversation keeps a readable cadence.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CouncilError;
use crate::message::{MediaAttachment, MediaStatus};
use crate::participant::Participant;
use crate::settings::ConversationSettings;

/// Mono PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_hint: Option<&str>) -> Result<AudioClip, CouncilError>;
}

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play (or render) a clip; resolves once playback is done.
    async fn play(&self, clip: &AudioClip, speaker: &str) -> Result<(), CouncilError>;
}

/// Publishes media so the video animator can fetch it.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload_avatar(&self, portrait: &str, persona_name: &str) -> Result<String, CouncilError>;

    async fn upload_audio(
        &self,
        clip: &AudioClip,
        persona_name: &str,
        message_id: Uuid,
    ) -> Result<String, CouncilError>;
}

#[async_trait]
pub trait VideoAnimator: Send + Sync {
    /// Animate a portrait to the given audio; returns the video reference.
    async fn animate(&self, portrait_ref: &str, audio_ref: &str) -> Result<String, CouncilError>;
}

/// Everything the pipeline needs about one accepted turn.
#[derive(Debug, Clone)]
pub struct SideEffectRequest {
    pub message_id: Uuid,
    pub text: String,
    pub speaker: Participant,
}

impl SideEffectRequest {
    /// Whether this turn goes down the talking-head path under `settings`.
    pub fn wants_video(&self, settings: &ConversationSettings) -> bool {
        settings.talking_heads && self.speaker.avatar_image().is_some()
    }
}

/// Speech and video collaborators. Any of them may be absent.
#[derive(Clone, Default)]
pub struct SideEffectPipeline {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    player: Option<Arc<dyn AudioPlayer>>,
    assets: Option<Arc<dyn AssetStore>>,
    animator: Option<Arc<dyn VideoAnimator>>,
}

impl SideEffectPipeline {
    /// A pipeline with no collaborators: every turn is paced silently.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn with_speech(
        mut self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        self.synthesizer = Some(synthesizer);
        self.player = Some(player);
        self
    }

    pub fn with_video(mut self, assets: Arc<dyn AssetStore>, animator: Arc<dyn VideoAnimator>) -> Self {
        self.assets = Some(assets);
        self.animator = Some(animator);
        self
    }

    /// Run the side effects for one turn and report the media produced.
    pub async fn run(
        &self,
        request: &SideEffectRequest,
        settings: &ConversationSettings,
    ) -> MediaAttachment {
        let portrait = request
            .speaker
            .avatar_image()
            .filter(|_| settings.talking_heads);

        if let Some(portrait) = portrait {
            match self.talking_head(request, portrait).await {
                Ok(media) => {
                    tokio::time::sleep(settings.timings.after_video).await;
                    return media;
                }
                Err(e) => {
                    warn!(
                        participant = %request.speaker.name,
                        error = %e,
                        "talking head failed, falling back to speech"
                    );
                    self.speak(request, settings).await;
                    return MediaAttachment {
                        video_status: Some(MediaStatus::Failed),
                        ..Default::default()
                    };
                }
            }
        }

        self.speak(request, settings).await;
        MediaAttachment::default()
    }

    async fn talking_head(
        &self,
        request: &SideEffectRequest,
        portrait: &str,
    ) -> Result<MediaAttachment, CouncilError> {
        let (Some(synthesizer), Some(assets), Some(animator)) =
            (&self.synthesizer, &self.assets, &self.animator)
        else {
            return Err(CouncilError::VideoError(
                "talking heads need speech, asset and video services".to_string(),
            ));
        };

        let persona_name = request.speaker.character_name();
        debug!(persona = persona_name, "generating talking head audio");
        let clip = synthesizer
            .synthesize(&request.text, request.speaker.voice_hint())
            .await?;

        let (avatar_ref, audio_ref) = tokio::try_join!(
            assets.upload_avatar(portrait, persona_name),
            assets.upload_audio(&clip, persona_name, request.message_id),
        )?;

        debug!(persona = persona_name, "animating talking head");
        let video_ref = animator.animate(&avatar_ref, &audio_ref).await?;

        Ok(MediaAttachment {
            video_status: Some(MediaStatus::Completed),
            audio_ref: Some(audio_ref),
            video_ref: Some(video_ref),
            avatar_ref: Some(avatar_ref),
        })
    }

    /// Plain speech, or a pacing pause when voice is off or fails.
    async fn speak(&self, request: &SideEffectRequest, settings: &ConversationSettings) {
        let timings = &settings.timings;
        if !settings.auto_play_voice {
            tokio::time::sleep(timings.silent_pacing).await;
            return;
        }

        match self.play_speech(request).await {
            Ok(()) => tokio::time::sleep(timings.after_speech).await,
            Err(e) => {
                debug!(participant = %request.speaker.name, error = %e, "speech skipped");
                tokio::time::sleep(timings.silent_pacing).await;
            }
        }
    }

    async fn play_speech(&self, request: &SideEffectRequest) -> Result<(), CouncilError> {
        let (Some(synthesizer), Some(player)) = (&self.synthesizer, &self.player) else {
            return Err(CouncilError::TtsError("no speech synthesizer configured".to_string()));
        };

        let clip = synthesizer
            .synthesize(&request.text, request.speaker.voice_hint())
            .await?;
        player.play(&clip, &request.speaker.name).await
    }
}
