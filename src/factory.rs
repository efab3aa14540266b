//! # Provider Factory
//!
//! Turns the `stt`/`llm`/`tts` configuration sections into engine instances and builds
//! one [`PipelineAgent`] per session.
//!
//! ## Sharing Rules:
//! - Recognition, generation and the detectors are built once and shared through `Arc`
//! - Synthesis is built fresh for every session, so a voice or language change made by
//!   one client never reaches another
//!
//! ## Key Rust Concepts:
//! - **Trait objects**: callers only ever see `Arc<dyn SpeechToText>` etc.
//! - **Boxed closures**: the synthesis builder is stored as `Arc<dyn Fn() -> ...>` so tests
//!   can swap in a scripted engine without touching the network

use crate::config::{AppConfig, LlmConfig, SttConfig, TtsConfig, LLM_PROVIDERS, STT_PROVIDERS, TTS_PROVIDERS};
use crate::device::DevicePreference;
use crate::generation::{ChatCompletionsGenerator, ChatProvider};
use crate::pipeline::{
    AgentSettings, ConversationContext, EndOfUtteranceDetector, PipelineAgent, Providers, ResponseGenerator,
    SimpleEndpointingVad, SpeechSynthesis, SpeechToText, TurnPolicy, VoiceActivity,
};
use crate::synthesis::{CartesiaTts, ElevenLabsTts};
use crate::transcription::{ModelSize, OpenAiStt, WhisperStt};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

type SynthesisBuilder = dyn Fn() -> Result<Box<dyn SpeechSynthesis>> + Send + Sync;

fn unknown_provider(stage: &str, name: &str, available: &[&str]) -> anyhow::Error {
    anyhow!(
        "Unknown {} provider '{}'. Available providers: {}",
        stage,
        name,
        available.join(", ")
    )
}

/// Build the speech recognizer named by `config.provider`.
///
/// With `preload` set the local Whisper model is fetched now; a failed preload is
/// logged and the model is retried lazily on the first utterance.
pub async fn create_stt(config: &SttConfig) -> Result<Arc<dyn SpeechToText>> {
    let language = Some(config.language.clone()).filter(|l| !l.trim().is_empty());

    match config.provider.to_lowercase().as_str() {
        "whisper" => {
            let size: ModelSize = config.model_size.parse().context("invalid stt.model_size")?;
            let whisper = WhisperStt::new(size, DevicePreference::from_config(&config.device), language);
            if config.preload {
                if let Err(err) = whisper.preload().await {
                    warn!("Whisper preload failed, will load on first utterance: {:#}", err);
                }
            }
            Ok(Arc::new(whisper))
        }
        "openai" => Ok(Arc::new(OpenAiStt::new(
            config.api_base.clone(),
            config.api_key.clone(),
            config.api_model.clone(),
            language,
        )?)),
        other => Err(unknown_provider("stt", other, STT_PROVIDERS)),
    }
}

/// Build the response generator named by `config.provider`.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn ResponseGenerator>> {
    let provider = match config.provider.to_lowercase().as_str() {
        "openai" => ChatProvider::OpenAi,
        "llama" | "groq" => ChatProvider::Groq,
        other => return Err(unknown_provider("llm", other, LLM_PROVIDERS)),
    };
    let generator = ChatCompletionsGenerator::new(
        provider,
        &config.api_key,
        &config.model,
        &config.api_base,
        config.max_tokens,
    )?;
    Ok(Arc::new(generator))
}

/// Build one synthesizer named by `config.provider`, starting in `default_language`.
pub fn create_tts(config: &TtsConfig, default_language: &str) -> Result<Box<dyn SpeechSynthesis>> {
    match config.provider.to_lowercase().as_str() {
        "cartesia" => Ok(Box::new(CartesiaTts::new(
            &config.api_key,
            &config.voice_id,
            &config.model_id,
            &config.api_base,
            default_language,
        )?)),
        "elevenlabs" => Ok(Box::new(ElevenLabsTts::new(
            &config.api_key,
            &config.voice_id,
            &config.model_id,
            &config.api_base,
            default_language,
        )?)),
        other => Err(unknown_provider("tts", other, TTS_PROVIDERS)),
    }
}

/// Everything needed to start a new session's agent.
pub struct ProviderFactory {
    vad: Arc<dyn VoiceActivity>,
    turn_policy: Arc<dyn TurnPolicy>,
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn ResponseGenerator>,
    synthesis: Arc<SynthesisBuilder>,
    tts_name: String,
    settings: AgentSettings,
    system_prompt: String,
}

impl ProviderFactory {
    /// Build the shared engines and check that a synthesizer can be constructed.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let stt = create_stt(&config.stt).await?;
        let llm = create_llm(&config.llm)?;
        let detector = EndOfUtteranceDetector::new(config.endpointing_policy()?);

        let tts_config = config.tts.clone();
        // fail at startup, not on the first connection
        let factory = Self::from_parts(
            stt,
            llm,
            move || create_tts(&tts_config, &tts_config.default_language),
            config.agent_settings(),
            config.pipeline.system_prompt.clone(),
        )
        .context("speech synthesis is misconfigured")?;

        let policy = detector.policy();
        info!(
            stt = factory.stt_name(),
            llm = factory.llm_name(),
            tts = factory.tts_name(),
            min_delay = policy.min_delay,
            max_delay = policy.max_delay,
            "Providers ready"
        );

        Ok(factory.with_detectors(Arc::new(SimpleEndpointingVad::default()), Arc::new(detector)))
    }

    /// Assemble a factory from ready-made engines.
    pub fn from_parts<F>(
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn ResponseGenerator>,
        synthesis: F,
        settings: AgentSettings,
        system_prompt: impl Into<String>,
    ) -> Result<Self>
    where
        F: Fn() -> Result<Box<dyn SpeechSynthesis>> + Send + Sync + 'static,
    {
        let tts_name = synthesis()?.name().to_string();
        Ok(Self {
            vad: Arc::new(SimpleEndpointingVad::default()),
            turn_policy: Arc::new(EndOfUtteranceDetector::default()),
            stt,
            llm,
            synthesis: Arc::new(synthesis),
            tts_name,
            settings,
            system_prompt: system_prompt.into(),
        })
    }

    pub fn with_detectors(mut self, vad: Arc<dyn VoiceActivity>, turn_policy: Arc<dyn TurnPolicy>) -> Self {
        self.vad = vad;
        self.turn_policy = turn_policy;
        self
    }

    /// A fresh agent with an empty conversation and its own synthesizer.
    pub fn build_agent(&self, session_id: &str) -> Result<PipelineAgent> {
        let providers = Providers {
            vad: Arc::clone(&self.vad),
            turn_policy: Arc::clone(&self.turn_policy),
            stt: Arc::clone(&self.stt),
            llm: Arc::clone(&self.llm),
            tts: (self.synthesis)()?,
        };
        debug!(
            session_id,
            tts = providers.tts.name(),
            language = providers.tts.current_language().unwrap_or("default"),
            "agent providers ready"
        );
        Ok(PipelineAgent::new(
            session_id,
            providers,
            self.settings,
            ConversationContext::new(self.system_prompt.clone()),
        ))
    }

    pub fn stt_name(&self) -> &str {
        self.stt.name()
    }

    pub fn llm_name(&self) -> &str {
        self.llm.name()
    }

    pub fn tts_name(&self) -> &str {
        &self.tts_name
    }
}
