//! Publishing talking-head inputs from a local directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::CouncilError;
use crate::pipeline::{AssetStore, AudioClip};
use crate::tts::write_wav;

/// Stores assets under `root`, which is served at `public_base_url`.
#[derive(Debug, Clone)]
pub struct DirectoryAssetStore {
    root: PathBuf,
    public_base_url: String,
    conversation_id: Uuid,
}

impl DirectoryAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            conversation_id: Uuid::now_v7(),
        }
    }

    fn relative_dir(&self, kind: &str) -> String {
        format!("councils/{}/{}", self.conversation_id, kind)
    }

    fn public_url(&self, relative: &str) -> String {
        format!("{}/{}", self.public_base_url, relative)
    }
}

#[async_trait]
impl AssetStore for DirectoryAssetStore {
    async fn upload_avatar(&self, portrait: &str, persona_name: &str) -> Result<String, CouncilError> {
        if is_remote(portrait) {
            return Ok(portrait.to_string());
        }

        let source = Path::new(portrait);
        if !tokio::fs::try_exists(source).await? {
            return Err(CouncilError::AssetError(format!(
                "avatar image not found: {}",
                portrait
            )));
        }

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let relative = format!(
            "{}/{}-avatar.{}",
            self.relative_dir("avatars"),
            sanitize_persona_name(persona_name),
            extension
        );

        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target).await?;
        debug!(target = %target.display(), "published avatar");

        Ok(self.public_url(&relative))
    }

    async fn upload_audio(
        &self,
        clip: &AudioClip,
        persona_name: &str,
        message_id: Uuid,
    ) -> Result<String, CouncilError> {
        let relative = format!(
            "{}/{}-{}.wav",
            self.relative_dir("audio"),
            sanitize_persona_name(persona_name),
            message_id
        );

        let target = self.root.join(&relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_wav(&target, &clip.samples, clip.sample_rate)?;
        debug!(target = %target.display(), "published audio");

        Ok(self.public_url(&relative))
    }
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:")
}

fn sanitize_persona_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
