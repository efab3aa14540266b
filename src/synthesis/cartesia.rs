//! Cartesia TTS over the HTTP `POST /tts/bytes` endpoint.

use super::{ensure_audio, ensure_request, resolve_language, speed_preset, OUTPUT_ENCODING, OUTPUT_SAMPLE_RATE};
use crate::language::normalize_language;
use crate::pipeline::{SpeechSynthesis, SynthesizedAudio};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.cartesia.ai";
pub const DEFAULT_MODEL: &str = "sonic-2";
const CARTESIA_VERSION: &str = "2025-04-16";

#[derive(Debug, Serialize)]
struct CartesiaRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: CartesiaVoice<'a>,
    language: String,
    output_format: CartesiaOutputFormat,
}

#[derive(Debug, Serialize)]
struct CartesiaVoice<'a> {
    mode: &'static str,
    id: &'a str,
    __experimental_controls: CartesiaControls,
}

#[derive(Debug, Serialize)]
struct CartesiaControls {
    speed: &'static str,
    emotion: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CartesiaOutputFormat {
    container: &'static str,
    sample_rate: u32,
    bit_rate: u32,
}

pub struct CartesiaTts {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_id: String,
    voice_id: String,
    language: String,
}

impl CartesiaTts {
    pub fn new(api_key: &str, voice_id: &str, model_id: &str, api_base: &str, default_language: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(anyhow!("Cartesia synthesis requires an API key (CARTESIA_API_KEY)"));
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

    fn request_body<'a>(&'a self, text: &'a str, language: String, speed: f32) -> CartesiaRequest<'a> {
        CartesiaRequest {
            model_id: &self.model_id,
            transcript: text,
            voice: CartesiaVoice {
                mode: "id",
                id: &self.voice_id,
                __experimental_controls: CartesiaControls {
                    speed: speed_preset(speed),
                    emotion: Vec::new(),
                },
            },
            language,
            output_format: CartesiaOutputFormat {
                container: OUTPUT_ENCODING,
                sample_rate: OUTPUT_SAMPLE_RATE,
                bit_rate: 128_000,
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesis for CartesiaTts {
    fn name(&self) -> &str {
        "cartesia"
    }

    async fn synthesize(&self, text: &str, language: Option<&str>, speed: f32, _pitch: f32) -> Result<SynthesizedAudio> {
        ensure_request(text, &self.voice_id)?;
        let language = resolve_language(language, &self.language);
        let body = self.request_body(text, language, speed);

        let url = format!("{}/tts/bytes", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Cartesia request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Cartesia API error {}: {}", status, body_text));
        }

        let audio = ensure_audio(response.bytes().await.context("failed to read Cartesia audio")?.to_vec())?;
        tracing::debug!(bytes = audio.len(), voice_id = %self.voice_id, "Cartesia synthesis complete");

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

    fn tts() -> CartesiaTts {
        CartesiaTts::new("key", "voice-a", "", "", "en-US").unwrap()
    }

    #[test]
    fn test_defaults() {
        let tts = tts();
        assert_eq!(tts.api_base, DEFAULT_API_BASE);
        assert_eq!(tts.model_id, "sonic-2");
        assert_eq!(tts.current_language(), Some("en"));
        assert!(CartesiaTts::new("", "voice", "", "", "en").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let tts = tts();
        let body = serde_json::to_value(tts.request_body("hello", "fr".to_string(), 0.6)).unwrap();

        assert_eq!(body["model_id"], "sonic-2");
        assert_eq!(body["transcript"], "hello");
        assert_eq!(body["voice"]["id"], "voice-a");
        assert_eq!(body["voice"]["__experimental_controls"]["speed"], "slow");
        assert_eq!(body["language"], "fr");
        assert_eq!(body["output_format"]["container"], "mp3");
        assert_eq!(body["output_format"]["sample_rate"], 44100);
    }

    #[test]
    fn test_voice_and_language_are_per_instance() {
        let mut first = tts();
        let second = tts();

        assert!(first.set_voice_id("voice-b"));
        assert!(first.set_language("es-MX"));

        assert_eq!(first.voice_id, "voice-b");
        assert_eq!(first.current_language(), Some("es"));
        assert_eq!(second.voice_id, "voice-a");
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        let err = tts().synthesize("", None, 1.0, 1.0).await.unwrap_err();
        assert!(err.to_string().contains("empty text"));
    }

    #[tokio::test]
    async fn test_missing_voice_is_an_error() {
        let tts = CartesiaTts::new("key", "", "", "", "en").unwrap();
        assert!(tts.synthesize("hello", None, 1.0, 1.0).await.is_err());
    }
}
