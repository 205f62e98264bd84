//! Talking-head video through a SadTalker prediction hosted on Replicate.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::CouncilError;
use crate::pipeline::VideoAnimator;

const REPLICATE_API_URL: &str = "https://api.replicate.com/v1/predictions";
const SADTALKER_MODEL_VERSION: &str = "3aa3dac9353cc4d6bd62a35e0f07e9e57f52422c";

/// A Replicate prediction as returned by the create and get endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Where a prediction stands after a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Succeeded(String),
    Failed(String),
}

impl Prediction {
    pub fn state(&self) -> PollState {
        match self.status.as_str() {
            "succeeded" => match &self.output {
                Some(url) if !url.is_empty() => PollState::Succeeded(url.clone()),
                _ => PollState::Failed("No video output received from SadTalker".to_string()),
            },
            "failed" | "canceled" => PollState::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| "Video generation failed".to_string()),
            ),
            _ => PollState::Pending,
        }
    }
}

/// Animates portraits with SadTalker, polling until done or out of attempts.
pub struct ReplicateAnimator {
    http: reqwest::Client,
    api_token: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl ReplicateAnimator {
    pub fn new(api_token: impl Into<String>) -> Result<Self, CouncilError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            api_token: api_token.into(),
            poll_interval: Duration::from_secs(1),
            max_attempts: 120,
        })
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_attempts: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_attempts = max_attempts;
        self
    }

    async fn create_prediction(&self, image_url: &str, audio_url: &str) -> Result<Prediction, CouncilError> {
        let body = json!({
            "version": SADTALKER_MODEL_VERSION,
            "input": {
                "source_image": image_url,
                "driven_audio": audio_url,
                "still": true,
                "preprocess": "crop",
                "enhancer": "gfpgan",
                "face_model_resolution": "256",
            }
        });

        let response = self
            .http
            .post(REPLICATE_API_URL)
            .header("Authorization", format!("Token {}", self.api_token))
            .header("Prefer", "wait=10")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CouncilError::VideoError(format!(
                "SadTalker generation failed: {}",
                detail
            )));
        }

        Ok(response.json().await?)
    }

    async fn get_prediction(&self, id: &str) -> Result<Prediction, CouncilError> {
        let response = self
            .http
            .get(format!("{}/{}", REPLICATE_API_URL, id))
            .header("Authorization", format!("Token {}", self.api_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CouncilError::VideoError(
                "Failed to check prediction status".to_string(),
            ));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl VideoAnimator for ReplicateAnimator {
    async fn animate(&self, portrait_ref: &str, audio_ref: &str) -> Result<String, CouncilError> {
        let mut prediction = self.create_prediction(portrait_ref, audio_ref).await?;
        info!(prediction = %prediction.id, "talking head prediction started");

        let mut attempts = 0;
        loop {
            match prediction.state() {
                PollState::Succeeded(url) => return Ok(url),
                PollState::Failed(reason) => return Err(CouncilError::VideoError(reason)),
                PollState::Pending if attempts >= self.max_attempts => {
                    return Err(CouncilError::VideoError(format!(
                        "Video generation timed out after {} attempts",
                        attempts
                    )));
                }
                PollState::Pending => {}
            }

            tokio::time::sleep(self.poll_interval).await;
            prediction = self.get_prediction(&prediction.id).await?;
            attempts += 1;
            debug!(prediction = %prediction.id, status = %prediction.status, attempts, "polled");
        }
    }
}
