//! TTS module for text-to-speech synthesis using kokoro-tiny.

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::config::VoicesConfig;
use crate::error::CouncilError;
use crate::pipeline::{AudioClip, AudioPlayer, SpeechSynthesizer};

/// Kokoro renders at 24kHz.
pub const SAMPLE_RATE: u32 = 24_000;

/// Local speech synthesis through Kokoro.
pub struct KokoroSynthesizer {
    engine: AsyncMutex<TtsEngine>,
    voices: VoicesConfig,
    available_voices: Vec<String>,
}

impl KokoroSynthesizer {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new(voices: VoicesConfig) -> Result<Self, CouncilError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| CouncilError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();
        let synthesizer = Self {
            engine: AsyncMutex::new(engine),
            voices,
            available_voices,
        };
        synthesizer.validate_voice(&synthesizer.voices.default_voice)?;

        Ok(synthesizer)
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), CouncilError> {
        if voice_id.is_empty() {
            return Err(CouncilError::TtsError(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                self.format_available_voices()
            )));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(CouncilError::TtsError(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                self.format_available_voices()
            )));
        }

        Ok(())
    }

    /// Format available voices for display.
    fn format_available_voices(&self) -> String {
        let mut english_voices: Vec<&String> = self
            .available_voices
            .iter()
            .filter(|v| {
                v.starts_with("af_")
                    || v.starts_with("am_")
                    || v.starts_with("bf_")
                    || v.starts_with("bm_")
            })
            .collect();
        english_voices.sort();

        english_voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Pick a Kokoro voice for a hint: a Kokoro id, a known alias, or the default.
    pub fn resolve_voice(&self, hint: Option<&str>) -> String {
        resolve_voice(hint, &self.available_voices, &self.voices.default_voice)
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    /// Kokoro-tiny has a strict limit on text length, so text is split into small chunks.
    async fn synthesize(&self, text: &str, voice_hint: Option<&str>) -> Result<AudioClip, CouncilError> {
        let voice_id = self.resolve_voice(voice_hint);
        let text = prepare_for_speech(text);
        let chunks = split_into_chunks(&text, 200);

        let mut all_samples = Vec::new();
        let mut engine = self.engine.lock().await;

        for chunk in chunks {
            if chunk.trim().is_empty() {
                continue;
            }

            let samples = engine
                .synthesize(&chunk, Some(voice_id.as_str()))
                .map_err(|e| CouncilError::TtsError(format!("Synthesis failed: {}", e)))?;

            all_samples.extend(samples);

            // Add pause between chunks (0.3 seconds) to prevent cutoff
            all_samples.extend(vec![0.0; (SAMPLE_RATE as f32 * 0.3) as usize]);
        }
        drop(engine);

        // Trailing padding (0.5 seconds) so the final word is not clipped
        all_samples.extend(vec![0.0; (SAMPLE_RATE / 2) as usize]);

        debug!(voice = %voice_id, samples = all_samples.len(), "synthesized speech");

        Ok(AudioClip {
            samples: adjust_audio_speed(all_samples, self.voices.speech_rate),
            sample_rate: SAMPLE_RATE,
        })
    }
}

/// Writes each spoken turn to its own WAV file and keeps a running recording.
pub struct WavFileSink {
    dir: PathBuf,
    counter: AtomicUsize,
    recorded: Mutex<Vec<Vec<f32>>>,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CouncilError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        })
    }

    /// Write every clip played so far into one recording named after the topic.
    pub fn write_recording(&self, topic: &str) -> Result<Option<PathBuf>, CouncilError> {
        let segments = self
            .recorded
            .lock()
            .map_err(|_| CouncilError::TtsError("recording lock poisoned".to_string()))?
            .clone();

        if segments.is_empty() {
            return Ok(None);
        }

        let combined = combine_audio_segments(segments, 0.5, SAMPLE_RATE);
        let path = self.dir.join(generate_output_filename(topic));
        write_wav(&path, &combined, SAMPLE_RATE)?;
        info!(path = %path.display(), "wrote conversation recording");
        Ok(Some(path))
    }
}

#[async_trait]
impl AudioPlayer for WavFileSink {
    async fn play(&self, clip: &AudioClip, speaker: &str) -> Result<(), CouncilError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .dir
            .join(format!("{:03}-{}.wav", index, sanitize_file_stem(speaker)));
        write_wav(&path, &clip.samples, clip.sample_rate)?;

        self.recorded
            .lock()
            .map_err(|_| CouncilError::TtsError("recording lock poisoned".to_string()))?
            .push(clip.samples.clone());

        debug!(path = %path.display(), seconds = clip.duration_secs(), "rendered speech");
        Ok(())
    }
}

/// Write mono float samples as a 32-bit float WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), CouncilError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

const VOICE_ALIASES: [(&str, &str); 6] = [
    ("alloy", "af_alloy"),
    ("nova", "af_nova"),
    ("shimmer", "af_bella"),
    ("echo", "am_echo"),
    ("fable", "bm_fable"),
    ("onyx", "am_onyx"),
];

fn resolve_voice(hint: Option<&str>, available: &[String], default_voice: &str) -> String {
    let Some(hint) = hint.map(|h| h.trim().to_lowercase()) else {
        return default_voice.to_string();
    };

    if available.iter().any(|v| *v == hint) {
        return hint;
    }

    VOICE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == hint)
        .map(|(_, voice)| *voice)
        .filter(|voice| available.iter().any(|v| v == voice))
        .unwrap_or(default_voice)
        .to_string()
}

static BRACKETED: LazyLock<Option<regex::Regex>> =
    LazyLock::new(|| regex::Regex::new(r"\[.*?\]").ok());

/// Strip markup that should not be read aloud.
pub fn prepare_for_speech(text: &str) -> String {
    let mut result = text.replace('*', "");

    if let Some(re) = BRACKETED.as_ref() {
        result = re.replace_all(&result, "").to_string();
    }

    let paragraphs: Vec<&str> = result
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    paragraphs.join(". ").replace('\n', " ").trim().to_string()
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    // Split by sentence-ending punctuation
    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            // If single sentence is too long, split by commas
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars && !current_chunk.is_empty() {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk = String::new();
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                }
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        } else {
            current_chunk.push_str(sentence);
            current_chunk.push(' ');
        }
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

/// Adjust audio playback speed using linear interpolation.
/// Rate < 1.0 = slower (e.g., 0.9 = 90% speed), Rate > 1.0 = faster.
pub fn adjust_audio_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if (rate - 1.0).abs() < 0.001 || rate <= 0.0 {
        return samples;
    }

    let new_len = (samples.len() as f32 / rate) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f32 * rate;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f32;

        if src_idx + 1 < samples.len() {
            let sample = samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac;
            result.push(sample);
        } else if src_idx < samples.len() {
            result.push(samples[src_idx]);
        }
    }

    result
}

/// Combine multiple audio segments with silence gaps.
pub fn combine_audio_segments(
    segments: Vec<Vec<f32>>,
    gap_seconds: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let gap_samples = (gap_seconds * sample_rate as f32) as usize;
    let silence: Vec<f32> = vec![0.0; gap_samples];

    let mut combined = Vec::new();

    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            combined.extend(&silence);
        }
        combined.extend(segment);
    }

    combined
}

fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Generate filename for the combined recording.
pub fn generate_output_filename(topic: &str) -> String {
    let sanitized: String = topic
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let truncated: String = sanitized.chars().take(50).collect();

    format!("AI Council - {}.wav", truncated.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_output_filename() {
        assert_eq!(
            generate_output_filename("Should AI be open source?"),
            "AI Council - Should AI be open source_.wav"
        );
    }

    #[test]
    fn test_generate_output_filename_long() {
        let long_topic = "A".repeat(100);
        let filename = generate_output_filename(&long_topic);
        assert!(filename.len() < 70);
    }

    #[test]
    fn test_combine_audio_segments() {
        let seg1 = vec![1.0, 1.0];
        let seg2 = vec![2.0, 2.0];
        let combined = combine_audio_segments(vec![seg1, seg2], 0.1, 10); // 1 sample gap at 10Hz

        assert_eq!(combined.len(), 5);
        assert_eq!(combined[2], 0.0);
    }

    #[test]
    fn test_split_into_chunks() {
        let text = "Hello world. This is a test. Another sentence here.";
        let chunks = split_into_chunks(text, 30);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.len() <= 35);
        }
    }

    #[test]
    fn test_prepare_for_speech() {
        let text = "**Bold** claim [laughs] here.\n\nSecond\nparagraph";
        assert_eq!(prepare_for_speech(text), "Bold claim  here.. Second paragraph");
    }

    #[test]
    fn test_resolve_voice() {
        let available = vec!["af_sky".to_string(), "am_onyx".to_string(), "bf_emma".to_string()];
        assert_eq!(resolve_voice(Some("onyx"), &available, "af_sky"), "am_onyx");
        assert_eq!(resolve_voice(Some("bf_emma"), &available, "af_sky"), "bf_emma");
        // alias exists but the voice is not installed
        assert_eq!(resolve_voice(Some("nova"), &available, "af_sky"), "af_sky");
        assert_eq!(resolve_voice(None, &available, "af_sky"), "af_sky");
    }

    #[test]
    fn test_adjust_audio_speed_slower_is_longer() {
        let samples = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let slowed = adjust_audio_speed(samples.clone(), 0.9);
        assert_eq!(slowed.len(), 10);
        assert_eq!(adjust_audio_speed(samples.clone(), 1.0), samples);
    }

    #[tokio::test]
    async fn test_wav_sink_writes_turns_and_recording() {
        let dir = std::env::temp_dir().join(format!("aicouncil-sink-{}", uuid::Uuid::now_v7()));
        let sink = WavFileSink::new(&dir).unwrap();
        let clip = AudioClip {
            samples: vec![0.1; 100],
            sample_rate: SAMPLE_RATE,
        };

        sink.play(&clip, "Ada Lovelace").await.unwrap();
        sink.play(&clip, "Bot").await.unwrap();

        assert!(dir.join("001-Ada-Lovelace.wav").exists());
        assert!(dir.join("002-Bot.wav").exists());

        let recording = sink.write_recording("Tabs or spaces?").unwrap().unwrap();
        let reader = hound::WavReader::open(&recording).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len() as usize, 200 + (SAMPLE_RATE / 2) as usize);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
