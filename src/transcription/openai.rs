//! Hosted speech recognition through an OpenAI-compatible `/audio/transcriptions`
//! endpoint.

use crate::audio::{self, TARGET_SAMPLE_RATE};
use crate::language::normalize_language;
use crate::pipeline::{AudioBuffer, SpeechToText, TranscriptSegment, TranscriptionResult};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

pub struct OpenAiStt {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

/// `verbose_json` response body.
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    #[serde(default)]
    id: usize,
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f32>,
}

impl OpenAiStt {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(anyhow!("OpenAI transcription requires an API key (OPENAI_API_KEY)"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            language: language.map(|l| normalize_language(&l)).filter(|l| !l.is_empty()),
        })
    }

    async fn run(&self, audio: &AudioBuffer) -> Result<TranscriptionResult> {
        let decoded = audio::decode(audio).context("could not decode audio")?;
        if decoded.samples.is_empty() {
            return Ok(TranscriptionResult::default());
        }

        let part = reqwest::multipart::Part::bytes(encode_wav(&decoded.samples)?)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!("{}/audio/transcriptions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription API error {}: {}", status, body));
        }

        let body: VerboseTranscription = response.json().await.context("invalid transcription response")?;
        Ok(into_result(body))
    }
}

fn into_result(body: VerboseTranscription) -> TranscriptionResult {
    let mut result = TranscriptionResult::from_text(body.text.trim());
    if let Some(language) = body.language.as_deref().map(normalize_language) {
        if !language.is_empty() {
            result = result.with_language(language, None);
        }
    }

    let logprobs: Vec<f32> = body.segments.iter().filter_map(|s| s.avg_logprob).collect();
    if !logprobs.is_empty() {
        let mean = logprobs.iter().sum::<f32>() / logprobs.len() as f32;
        result.confidence = Some(mean.exp().clamp(0.0, 1.0));
    }

    result.segments = body
        .segments
        .into_iter()
        .map(|s| TranscriptSegment {
            id: s.id,
            start: s.start,
            end: s.end,
            text: s.text.trim().to_string(),
            words: Vec::new(),
        })
        .collect();
    result
}

/// 16-bit mono WAV at the recognizer rate.
fn encode_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
        .collect();
    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, TARGET_SAMPLE_RATE, 16);
    let mut out = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut out).context("failed to encode WAV")?;
    Ok(out.into_inner())
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> TranscriptionResult {
        match self.run(audio).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!("OpenAI transcription failed: {:#}", err);
                TranscriptionResult::failed(format!("{:#}", err))
            }
        }
    }
}
