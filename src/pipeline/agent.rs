//! # Pipeline Agent
//!
//! Per-session orchestrator. Each call walks
//! `Idle → Transcribing → Generating → Synthesizing → Done`, dropping to `Aborted`
//! as soon as a stage yields nothing usable.
//!
//! ## Guarantees:
//! - Empty transcriptions (or a VAD/turn gate saying "not yet") never reach the LLM
//! - Once a user message is appended, the matching assistant message is appended too,
//!   whatever happens during synthesis
//! - Synthesis errors are caught here and only flip `success` to `false`
//!
//! ## Key Rust Concepts:
//! - **`&mut self` on process calls**: the borrow checker rules out two concurrent turns
//!   on the same agent, which keeps message order intact
//! - **Trait objects**: providers are `Arc<dyn ...>` (shared) or `Box<dyn ...>` (owned)

use super::context::{ConversationContext, Message, Role};
use super::models::{AudioBuffer, PipelineResult, PipelineStage, TranscriptionResult};
use super::providers::{ResponseGenerator, SpeechSynthesis, SpeechToText, TurnPolicy, VoiceActivity};
use std::sync::Arc;

/// The engines one agent talks to.
///
/// Recognition, generation and the detectors are shared between sessions. Synthesis is
/// owned because it carries per-session voice and language.
pub struct Providers {
    pub vad: Arc<dyn VoiceActivity>,
    pub turn_policy: Arc<dyn TurnPolicy>,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn ResponseGenerator>,
    pub tts: Box<dyn SpeechSynthesis>,
}

/// Generation and synthesis knobs applied to every turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub temperature: f32,
    pub speech_speed: f32,
    pub speech_pitch: f32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            speech_speed: 1.0,
            speech_pitch: 1.0,
        }
    }
}

pub struct PipelineAgent {
    session_id: String,
    providers: Providers,
    settings: AgentSettings,
    context: ConversationContext,
}

impl PipelineAgent {
    pub fn new(
        session_id: impl Into<String>,
        providers: Providers,
        settings: AgentSettings,
        context: ConversationContext,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            providers,
            settings,
            context,
        }
    }

    /// Run one spoken turn end to end.
    ///
    /// ## Returns:
    /// - `Aborted` with an empty transcription when the detectors reject the buffer
    /// - `Aborted` with the transcription when nothing was recognized; context untouched
    /// - otherwise the full result, `success` reflecting whether audio was produced
    pub async fn process_audio(&mut self, audio: AudioBuffer) -> PipelineResult {
        self.transition(PipelineStage::Idle);

        if !self.providers.vad.detect_speech(&audio).await {
            tracing::debug!(session_id = %self.session_id, "no speech in buffer, skipping turn");
            self.transition(PipelineStage::Aborted);
            return PipelineResult::aborted(Some(TranscriptionResult::default()));
        }

        if !self.providers.turn_policy.is_turn_complete(&audio).await {
            tracing::debug!(session_id = %self.session_id, "turn not complete, skipping");
            self.transition(PipelineStage::Aborted);
            return PipelineResult::aborted(Some(TranscriptionResult::default()));
        }

        self.transition(PipelineStage::Transcribing);
        let transcription = self.providers.stt.transcribe(&audio).await;

        if transcription.is_empty() {
            match &transcription.error {
                Some(err) => tracing::warn!(session_id = %self.session_id, error = %err, "transcription failed"),
                None => tracing::info!(session_id = %self.session_id, "no speech recognized"),
            }
            self.transition(PipelineStage::Aborted);
            return PipelineResult::aborted(Some(transcription));
        }

        tracing::info!(
            session_id = %self.session_id,
            language = ?transcription.language,
            "transcribed: {}",
            transcription.text
        );

        let user_text = transcription.text.trim().to_string();
        self.respond(Some(transcription), user_text).await
    }

    /// Run one typed turn. Same as [`Self::process_audio`] from the generation stage on.
    ///
    /// Blank input aborts without touching the context.
    pub async fn process_text(&mut self, text: &str) -> PipelineResult {
        self.transition(PipelineStage::Idle);

        if text.trim().is_empty() {
            self.transition(PipelineStage::Aborted);
            return PipelineResult::aborted(None);
        }

        self.respond(None, text.to_string()).await
    }

    async fn respond(&mut self, transcription: Option<TranscriptionResult>, user_text: String) -> PipelineResult {
        self.transition(PipelineStage::Generating);
        self.context.add_message(Role::User, user_text);

        let response = self
            .providers
            .llm
            .generate(&self.context, self.settings.temperature)
            .await;
        self.context.add_message(Role::Assistant, response.text.clone());

        self.transition(PipelineStage::Synthesizing);
        let synthesized = self
            .providers
            .tts
            .synthesize(&response.text, None, self.settings.speech_speed, self.settings.speech_pitch)
            .await;

        match synthesized {
            Ok(audio) => {
                self.transition(PipelineStage::Done);
                PipelineResult {
                    transcription,
                    llm_response: Some(response),
                    audio_response: Some(audio),
                    success: true,
                    stage: PipelineStage::Done,
                }
            }
            Err(err) => {
                tracing::error!(
                    session_id = %self.session_id,
                    provider = self.providers.tts.name(),
                    "speech synthesis failed: {:#}",
                    err
                );
                self.transition(PipelineStage::Aborted);
                PipelineResult {
                    transcription,
                    llm_response: Some(response),
                    audio_response: None,
                    success: false,
                    stage: PipelineStage::Aborted,
                }
            }
        }
    }

    fn transition(&self, stage: PipelineStage) {
        tracing::debug!(session_id = %self.session_id, stage = ?stage, "pipeline stage");
    }

    pub fn clear_conversation(&mut self) {
        self.context.clear();
    }

    /// Takes effect on the next generation call.
    pub fn update_system_prompt(&mut self, prompt: impl Into<String>) {
        self.context.set_system_prompt(prompt);
    }

    pub fn set_voice_id(&mut self, voice_id: &str) -> bool {
        self.providers.tts.set_voice_id(voice_id)
    }

    pub fn set_synthesis_language(&mut self, language: &str) -> bool {
        self.providers.tts.set_language(language)
    }

    /// Steer the following turns toward `language`.
    ///
    /// Rewrites the system prompt with a single leading directive, records the language
    /// in the context metadata and switches the synthesis language. Returns whether the
    /// synthesizer accepted the language.
    pub fn apply_language_preference(&mut self, language: &str) -> bool {
        let prompt = with_language_directive(self.context.system_prompt(), language);
        self.context.set_system_prompt(prompt);
        self.context
            .metadata
            .insert("language".to_string(), serde_json::Value::from(language));
        self.set_synthesis_language(language)
    }

    #[cfg(test)]
    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn history(&self) -> &[Message] {
        self.context.messages()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

const DIRECTIVE_HEAD: &str = "Respond in ";
const DIRECTIVE_TAIL: &str = " language. ";

/// Prefix `prompt` with a "Respond in {language} language. " directive.
///
/// An existing leading directive is replaced, so repeated calls never stack.
pub fn with_language_directive(prompt: &str, language: &str) -> String {
    format!("{}{}{}{}", DIRECTIVE_HEAD, language, DIRECTIVE_TAIL, strip_language_directive(prompt))
}

fn strip_language_directive(prompt: &str) -> &str {
    prompt
        .strip_prefix(DIRECTIVE_HEAD)
        .and_then(|rest| rest.find(DIRECTIVE_TAIL).map(|idx| &rest[idx + DIRECTIVE_TAIL.len()..]))
        .unwrap_or(prompt)
}
