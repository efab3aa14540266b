//! # Configuration Management
//!
//! Loads the server configuration from, in increasing priority:
//! 1. Built-in defaults (the `Default` impl below)
//! 2. `config.toml` in the working directory, if present
//! 3. `APP_*` environment variables, nested with `__` (e.g. `APP_LLM__PROVIDER=openai`)
//! 4. Deployment variables `HOST` and `PORT`
//!
//! Provider credentials are resolved last, from the vendor variables the hosted APIs
//! document (`OPENAI_API_KEY`, `GROQ_API_KEY`, `CARTESIA_API_KEY`, ...), but only for
//! fields the earlier layers left empty.
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: every section derives `Serialize`/`Deserialize` so the `config` crate can
//!   turn the defaults into a source and the merged result back into structs
//! - **#[serde(default)]**: partial files and env layers only need the keys they change
//! - **Closures as lookups**: secret resolution takes `Fn(&str) -> Option<String>` so tests
//!   never touch the real process environment

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::pipeline::{AgentSettings, EndpointingPolicy, DEFAULT_SYSTEM_PROMPT};

pub const STT_PROVIDERS: &[&str] = &["whisper", "openai"];
pub const LLM_PROVIDERS: &[&str] = &["openai", "llama", "groq"];
pub const TTS_PROVIDERS: &[&str] = &["cartesia", "elevenlabs"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP/WebSocket server listens.
///
/// `host = "0.0.0.0"` accepts connections from any interface; the default only
/// accepts local ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-turn behaviour shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prompt every new session starts with.
    pub system_prompt: String,
    pub temperature: f32,
    pub speech_speed: f32,
    pub speech_pitch: f32,
    /// Assumed format of raw (non-WAV) binary frames.
    pub input_sample_rate: u32,
    pub input_channels: u16,
    pub min_endpointing_delay: f32,
    pub max_endpointing_delay: f32,
}

/// Speech recognition engine.
///
/// ## Providers:
/// - `whisper`: local candle Whisper; `model_size` is one of tiny/base/small/medium/large
/// - `openai`: hosted transcription endpoint at `api_base`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub provider: String,
    pub model_size: String,
    /// Language hint. Empty means detect per utterance.
    pub language: String,
    /// `auto`, `cpu`, `cuda` or `metal`.
    pub device: String,
    /// Load the local model at startup instead of on the first utterance.
    pub preload: bool,
    pub api_base: String,
    pub api_key: String,
    pub api_model: String,
}

/// Response generator. Empty `model`/`api_base` pick the provider's defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: String,
    pub api_key: String,
    /// Voice every session starts with; clients may switch per session.
    pub voice_id: String,
    pub model_id: String,
    pub default_language: String,
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pipeline: PipelineConfig::default(),
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            speech_speed: 1.0,
            speech_pitch: 1.0,
            input_sample_rate: 16000,
            input_channels: 1,
            min_endpointing_delay: 0.5,
            max_endpointing_delay: 5.0,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "whisper".to_string(),
            model_size: "base".to_string(), // large is accurate but slow on CPU
            language: String::new(),
            device: "auto".to_string(),
            preload: false,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            api_model: "whisper-1".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "llama".to_string(),
            model: String::new(),
            api_base: String::new(),
            api_key: String::new(),
            max_tokens: 300,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "elevenlabs".to_string(),
            api_key: String::new(),
            voice_id: String::new(),
            model_id: String::new(),
            default_language: "en".to_string(),
            api_base: String::new(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources (see module docs for the order).
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without our prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.resolve_secrets(|name| env::var(name).ok().filter(|v| !v.is_empty()));
        Ok(config)
    }

    /// Fill empty credentials and voice ids from vendor environment variables.
    pub fn resolve_secrets<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|name| lookup(name));

        if self.stt.api_key.is_empty() && self.stt.provider.eq_ignore_ascii_case("openai") {
            if let Some(key) = first(&["OPENAI_API_KEY"]) {
                self.stt.api_key = key;
            }
        }

        if self.llm.api_key.is_empty() {
            let names = match self.llm.provider.to_lowercase().as_str() {
                "openai" => &["OPENAI_API_KEY"][..],
                _ => &["GROQ_API_KEY", "LLAMA_API_KEY"][..],
            };
            if let Some(key) = first(names) {
                self.llm.api_key = key;
            }
        }

        let (key_vars, voice_vars) = match self.tts.provider.to_lowercase().as_str() {
            "cartesia" => (&["CARTESIA_API_KEY"][..], &["CARTESIA_VOICE_ID"][..]),
            _ => (
                &["ELEVEN_LABS_API_KEY", "ELEVENLABS_API_KEY"][..],
                &["ELEVENLABS_VOICE_ID"][..],
            ),
        };
        if self.tts.api_key.is_empty() {
            if let Some(key) = first(key_vars) {
                self.tts.api_key = key;
            }
        }
        if self.tts.voice_id.is_empty() {
            if let Some(voice) = first(voice_vars) {
                self.tts.voice_id = voice;
            }
        }
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(0.0..=2.0).contains(&self.pipeline.temperature) {
            return Err(anyhow::anyhow!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.pipeline.temperature
            ));
        }

        if self.pipeline.speech_speed <= 0.0 {
            return Err(anyhow::anyhow!("Speech speed must be positive"));
        }

        if self.pipeline.input_sample_rate == 0 || self.pipeline.input_channels == 0 {
            return Err(anyhow::anyhow!("Input sample rate and channel count must be greater than 0"));
        }

        self.endpointing_policy()?;

        check_provider("stt", &self.stt.provider, STT_PROVIDERS)?;
        check_provider("llm", &self.llm.provider, LLM_PROVIDERS)?;
        check_provider("tts", &self.tts.provider, TTS_PROVIDERS)?;

        Ok(())
    }

    /// Turn-level settings handed to every new agent.
    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            temperature: self.pipeline.temperature,
            speech_speed: self.pipeline.speech_speed,
            speech_pitch: self.pipeline.speech_pitch,
        }
    }

    /// Delay bounds for the end-of-turn detector.
    pub fn endpointing_policy(&self) -> Result<EndpointingPolicy> {
        EndpointingPolicy::new(
            self.pipeline.min_endpointing_delay,
            self.pipeline.max_endpointing_delay,
        )
    }
}

/// Provider names are matched case-insensitively, as the factory does.
fn check_provider(stage: &str, name: &str, known: &[&str]) -> Result<()> {
    if known.contains(&name.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Unknown {} provider '{}'. Available: {}",
            stage,
            name,
            known.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.llm.max_tokens, 300);
        assert_eq!(config.tts.default_language, "en");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.min_endpointing_delay = 6.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_lists_alternatives() {
        let mut config = AppConfig::default();
        config.tts.provider = "espeak".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("espeak"));
        assert!(err.contains("cartesia, elevenlabs"));
    }

    #[test]
    fn test_secrets_follow_selected_providers() {
        let mut config = AppConfig::default();
        config.tts.provider = "cartesia".to_string();
        config.resolve_secrets(lookup_from(&[
            ("LLAMA_API_KEY", "llama-key"),
            ("CARTESIA_API_KEY", "cartesia-key"),
            ("CARTESIA_VOICE_ID", "voice-1"),
            ("ELEVENLABS_VOICE_ID", "wrong-voice"),
        ]));

        assert_eq!(config.llm.api_key, "llama-key");
        assert_eq!(config.tts.api_key, "cartesia-key");
        assert_eq!(config.tts.voice_id, "voice-1");
        // whisper runs locally and needs no key
        assert!(config.stt.api_key.is_empty());
    }

    #[test]
    fn test_explicit_values_win_over_vendor_env() {
        let mut config = AppConfig::default();
        config.llm.provider = "openai".to_string();
        config.llm.api_key = "from-file".to_string();
        config.resolve_secrets(lookup_from(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(config.llm.api_key, "from-file");
    }

    #[test]
    fn test_groq_key_preferred_over_llama_key() {
        let mut config = AppConfig::default();
        config.resolve_secrets(lookup_from(&[
            ("GROQ_API_KEY", "groq"),
            ("LLAMA_API_KEY", "llama"),
        ]));
        assert_eq!(config.llm.api_key, "groq");
    }

    #[test]
    fn test_agent_settings_from_pipeline_section() {
        let mut config = AppConfig::default();
        config.pipeline.temperature = 0.2;
        config.pipeline.speech_speed = 1.5;

        let settings = config.agent_settings();
        assert_eq!(settings.temperature, 0.2);
        assert_eq!(settings.speech_speed, 1.5);

        config.pipeline.min_endpointing_delay = 1.0;
        let policy = config.endpointing_policy().unwrap();
        assert_eq!(policy.min_delay, 1.0);
        assert_eq!(policy.max_delay, 5.0);
    }

    #[test]
    fn test_provider_names_ignore_case() {
        let mut config = AppConfig::default();
        config.stt.provider = "Whisper".to_string();
        config.llm.provider = "OpenAI".to_string();
        config.tts.provider = "ElevenLabs".to_string();
        assert!(config.validate().is_ok());

        config.llm.provider = "Mistral".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.tts.provider = "Cartesia".to_string();
        config.resolve_secrets(lookup_from(&[("CARTESIA_API_KEY", "cartesia-key")]));
        assert_eq!(config.tts.api_key, "cartesia-key");
    }
}
