//! # Provider Contracts
//!
//! One trait per external capability. The agent only ever sees these traits, so a
//! concrete engine (local Whisper, a hosted LLM, a TTS vendor) can be swapped without
//! touching the orchestration code.
//!
//! ## Failure Policy:
//! - [`SpeechToText`] and [`ResponseGenerator`] never fail: problems become values
//!   (an error marker or a fallback answer)
//! - [`SpeechSynthesis`] returns `anyhow::Result` and the caller decides what a failure means
//!
//! ## Key Rust Concepts:
//! - **async_trait**: lets trait methods be `async` while staying object safe
//! - **Send + Sync bounds**: providers are shared across sessions behind `Arc`
//! - **Default methods**: optional capabilities are plain methods that report `false`

use super::context::ConversationContext;
use super::models::{AudioBuffer, GeneratedResponse, SynthesizedAudio, TranscriptionResult};
use async_trait::async_trait;

/// Reports whether an audio buffer contains speech.
#[async_trait]
pub trait VoiceActivity: Send + Sync {
    async fn detect_speech(&self, audio: &AudioBuffer) -> bool;
}

/// Decides whether the caller has finished their utterance.
#[async_trait]
pub trait TurnPolicy: Send + Sync {
    async fn is_turn_complete(&self, audio: &AudioBuffer) -> bool;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Short engine name used in logs and health output.
    fn name(&self) -> &str;

    /// Recognize speech in `audio`.
    ///
    /// On failure returns an empty result with `error` set.
    async fn transcribe(&self, audio: &AudioBuffer) -> TranscriptionResult;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one assistant turn from the rendered `context` (system prompt included).
    ///
    /// On failure returns a response carrying an apologetic fallback text.
    async fn generate(&self, context: &ConversationContext, temperature: f32) -> GeneratedResponse;
}

/// Text to speech.
///
/// Instances hold per-session settings (voice, language), so every session gets its own.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    fn name(&self) -> &str;

    /// Render `text` as audio.
    ///
    /// ## Parameters:
    /// - `language`: override for this call; `None` uses the provider's current language.
    ///   Unsupported languages fall back to the provider default with a warning.
    /// - `speed`, `pitch`: multipliers where 1.0 is the natural voice
    ///
    /// ## Returns:
    /// Non-empty audio, or an error. Empty text is an error.
    async fn synthesize(
        &self,
        text: &str,
        language: Option<&str>,
        speed: f32,
        pitch: f32,
    ) -> anyhow::Result<SynthesizedAudio>;

    /// Change the language used when no override is given.
    ///
    /// Returns `false` when the provider has no notion of a current language.
    fn set_language(&mut self, _language: &str) -> bool {
        false
    }

    /// Change the voice. Returns `false` when voices cannot be selected.
    fn set_voice_id(&mut self, _voice_id: &str) -> bool {
        false
    }

    fn current_language(&self) -> Option<&str> {
        None
    }
}
