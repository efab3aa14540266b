//! # Pipeline Data Model
//!
//! Values that flow between the pipeline stages: inbound audio, the output of each
//! provider, and the structured result of one turn.

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// A complete chunk of caller audio.
///
/// Immutable once built. Ownership moves into `PipelineAgent::process_audio` for the
/// duration of the call.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    encoding: String,
}

impl AudioBuffer {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16, encoding: impl Into<String>) -> Self {
        Self {
            data,
            sample_rate,
            channels,
            encoding: encoding.into(),
        }
    }

    /// Audio as delivered by a binary WebSocket frame: a WAV payload.
    pub fn wav(data: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self::new(data, sample_rate, channels, "wav")
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// Timing for a single recognized word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
}

/// One recognized segment with its position in the audio (seconds).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub id: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<WordTiming>,
}

/// Output of the speech-to-text stage.
///
/// Empty `text` means nothing downstream runs. Recognition failures are reported through
/// `error` rather than by returning `Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
    pub language_probability: Option<f32>,
    pub confidence: Option<f32>,
    pub error: Option<String>,
}

impl TranscriptionResult {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Empty result carrying the reason recognition failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>, probability: Option<f32>) -> Self {
        self.language = Some(language.into());
        self.language_probability = probability;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One assistant turn produced by the response generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedResponse {
    pub text: String,
    /// Fresh for every call.
    pub response_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GeneratedResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response_id: Uuid::new_v4().to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Audio produced by the speech synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedAudio {
    #[serde(skip)]
    pub audio: Vec<u8>,
    pub encoding: String,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    /// Subprotocol tag attached to the outbound binary frame, e.g. `audio/mp3`.
    pub fn subprotocol(&self) -> String {
        format!("audio/{}", self.encoding)
    }
}

/// Where a single `process_*` call currently is.
///
/// Not persisted across calls: every call starts at `Idle` and ends in `Done` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Transcribing,
    Generating,
    Synthesizing,
    Done,
    Aborted,
}

/// Structured result of one turn.
///
/// `success` is true only when transcription (audio path), generation and synthesis all
/// produced usable output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub transcription: Option<TranscriptionResult>,
    pub llm_response: Option<GeneratedResponse>,
    pub audio_response: Option<SynthesizedAudio>,
    pub success: bool,
    pub stage: PipelineStage,
}

impl PipelineResult {
    pub(crate) fn aborted(transcription: Option<TranscriptionResult>) -> Self {
        Self {
            transcription,
            llm_response: None,
            audio_response: None,
            success: false,
            stage: PipelineStage::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_ids_are_unique() {
        let a = GeneratedResponse::new("hi");
        let b = GeneratedResponse::new("hi");
        assert_ne!(a.response_id, b.response_id);
    }

    #[test]
    fn test_whitespace_transcription_counts_as_empty() {
        assert!(TranscriptionResult::from_text("  \n").is_empty());
        assert!(!TranscriptionResult::from_text("hello").is_empty());

        let failed = TranscriptionResult::failed("decoder exploded");
        assert!(failed.is_empty());
        assert_eq!(failed.error.as_deref(), Some("decoder exploded"));
    }

    #[test]
    fn test_subprotocol_tag() {
        let audio = SynthesizedAudio {
            audio: vec![1, 2, 3],
            encoding: "mp3".to_string(),
            sample_rate: 44100,
        };
        assert_eq!(audio.subprotocol(), "audio/mp3");
    }
}
