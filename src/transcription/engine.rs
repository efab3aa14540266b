//! # Local Whisper Recognizer
//!
//! [`SpeechToText`] backed by the candle Whisper model in [`super::model`].
//!
//! ## Lifecycle:
//! - The model is downloaded and loaded on the first utterance, or at startup with
//!   [`WhisperStt::preload`]
//! - One model instance serves every session; inference runs on the blocking pool and
//!   utterances are recognized one at a time
//! - Any failure (decode, download, inference) becomes an error marker on an empty result

use super::model::{ModelSize, WhisperModel};
use crate::audio;
use crate::device::{device_label, select_device, DevicePreference};
use crate::language::normalize_language;
use crate::pipeline::{AudioBuffer, SpeechToText, TranscriptSegment, TranscriptionResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct WhisperStt {
    size: ModelSize,
    device: DevicePreference,
    /// Fixed language hint; `None` detects per utterance.
    language: Option<String>,
    model: Arc<Mutex<Option<WhisperModel>>>,
}

impl WhisperStt {
    pub fn new(size: ModelSize, device: DevicePreference, language: Option<String>) -> Self {
        let language = language
            .map(|l| normalize_language(&l))
            .filter(|l| !l.is_empty());
        Self {
            size,
            device,
            language,
            model: Arc::new(Mutex::new(None)),
        }
    }

    /// Load the model now instead of on the first utterance.
    pub async fn preload(&self) -> Result<()> {
        let mut slot = self.model.lock().await;
        if slot.is_none() {
            *slot = Some(self.load().await?);
        }
        Ok(())
    }

    async fn load(&self) -> Result<WhisperModel> {
        let device = select_device(self.device);
        tracing::info!(
            "Initializing Whisper {} on {}",
            self.size,
            device_label(&device)
        );
        WhisperModel::load(self.size, device).await
    }

    async fn run(&self, audio: &AudioBuffer) -> Result<TranscriptionResult> {
        let decoded = audio::decode(audio).context("could not decode audio")?;
        if decoded.samples.is_empty() {
            return Ok(TranscriptionResult::default());
        }

        self.preload().await?;
        tracing::debug!(seconds = decoded.duration_secs(), "running whisper");

        let model = Arc::clone(&self.model);
        let language = self.language.clone();
        let samples = decoded.samples;

        let transcript = tokio::task::spawn_blocking(move || {
            let mut slot = model.blocking_lock();
            let whisper = slot.as_mut().ok_or_else(|| anyhow!("whisper model is not loaded"))?;
            whisper.transcribe(&samples, language.as_deref())
        })
        .await
        .context("transcription task panicked")??;

        let mut result = TranscriptionResult::from_text(transcript.text.clone());
        if let Some(language) = &transcript.language {
            result = result.with_language(language.clone(), transcript.language_probability);
        }
        result.confidence = Some(transcript.avg_logprob.exp().clamp(0.0, 1.0));
        if !result.is_empty() {
            result.segments.push(TranscriptSegment {
                id: 0,
                start: 0.0,
                end: transcript.duration_secs,
                text: transcript.text,
                words: Vec::new(),
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> TranscriptionResult {
        match self.run(audio).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("Whisper transcription failed: {:#}", err);
                TranscriptionResult::failed(format!("{:#}", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WhisperStt {
        WhisperStt::new(ModelSize::Tiny, DevicePreference::Cpu, Some("en-GB".to_string()))
    }

    #[tokio::test]
    async fn test_empty_audio_skips_model_load() {
        let stt = engine();
        let result = stt.transcribe(&AudioBuffer::wav(Vec::new(), 16000, 1)).await;

        assert!(result.is_empty());
        assert!(result.error.is_none());
        assert!(stt.model.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_audio_becomes_error_marker() {
        let stt = engine();
        let garbage = AudioBuffer::new(vec![1, 2, 3], 16000, 1, "pcm");

        let result = stt.transcribe(&garbage).await;

        assert!(result.text.is_empty());
        assert!(result.error.unwrap().contains("could not decode audio"));
    }

    #[test]
    fn test_language_hint_is_normalized() {
        assert_eq!(engine().language.as_deref(), Some("en"));
        let auto = WhisperStt::new(ModelSize::Tiny, DevicePreference::Cpu, Some(String::new()));
        assert!(auto.language.is_none());
    }
}
