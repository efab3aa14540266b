//! ElevenLabs TTS over `POST /v1/text-to-speech/{voice_id}`.

use super::{ensure_audio, ensure_request, resolve_language, OUTPUT_ENCODING, OUTPUT_SAMPLE_RATE};
use crate::language::normalize_language;
use crate::pipeline::{SpeechSynthesis, SynthesizedAudio};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.elevenlabs.io";
pub const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const OUTPUT_FORMAT: &str = "mp3_44100_128";

#[derive(Debug, Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    /// Accepted range is 0.7 to 1.2.
    speed: f32,
}

pub struct ElevenLabsTts {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_id: String,
    voice_id: String,
    language: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: &str, voice_id: &str, model_id: &str, api_base: &str, default_language: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(anyhow!("ElevenLabs synthesis requires an API key (ELEVEN_LABS_API_KEY)"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        let api_base = if api_base.is_empty() { DEFAULT_API_BASE } else { api_base };
        let model_id = if model_id.is_empty() { DEFAULT_MODEL } else { model_id };
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            voice_id: voice_id.to_string(),
            language: normalize_language(default_language),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}?output_format={}",
            self.api_base, self.voice_id, OUTPUT_FORMAT
        )
    }

    fn request_body<'a>(&'a self, text: &'a str, speed: f32) -> ElevenLabsRequest<'a> {
        ElevenLabsRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                speed: speed.clamp(0.7, 1.2),
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesis for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, language: Option<&str>, speed: f32, _pitch: f32) -> Result<SynthesizedAudio> {
        ensure_request(text, &self.voice_id)?;
        // multilingual model picks the language from the text; resolution only validates
        let language = resolve_language(language, &self.language);

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&self.request_body(text, speed))
            .send()
            .await
            .context("ElevenLabs request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("ElevenLabs API error {}: {}", status, body_text));
        }

        let audio = ensure_audio(response.bytes().await.context("failed to read ElevenLabs audio")?.to_vec())?;
        tracing::debug!(bytes = audio.len(), language = %language, "ElevenLabs synthesis complete");

        Ok(SynthesizedAudio {
            audio,
            encoding: OUTPUT_ENCODING.to_string(),
            sample_rate: OUTPUT_SAMPLE_RATE,
        })
    }

    fn set_language(&mut self, language: &str) -> bool {
        self.language = normalize_language(language);
        true
    }

    fn set_voice_id(&mut self, voice_id: &str) -> bool {
        self.voice_id = voice_id.to_string();
        true
    }

    fn current_language(&self) -> Option<&str> {
        Some(&self.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_body() {
        let tts = ElevenLabsTts::new("key", "voice-x", "", "https://example.test/", "en").unwrap();
        assert_eq!(
            tts.endpoint(),
            "https://example.test/v1/text-to-speech/voice-x?output_format=mp3_44100_128"
        );

        let body = serde_json::to_value(tts.request_body("hola", 2.0)).unwrap();
        assert_eq!(body["text"], "hola");
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
        assert_eq!(body["voice_settings"]["speed"], 1.2f32 as f64);
    }

    #[test]
    fn test_switching_voice_changes_endpoint() {
        let mut tts = ElevenLabsTts::new("key", "voice-x", "", "", "en").unwrap();
        assert!(tts.set_voice_id("voice-y"));
        assert!(tts.endpoint().contains("/voice-y?"));
    }

    #[tokio::test]
    async fn test_unreachable_api_propagates_error() {
        let tts = ElevenLabsTts::new("key", "voice-x", "", "http://127.0.0.1:9", "xx").unwrap();
        let result = tts.synthesize("hello", None, 1.0, 1.0).await;
        assert!(result.is_err());
    }
}
