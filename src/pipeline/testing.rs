//! Scripted providers for unit tests. Every double shares its counters through `Arc`
//! so tests can inspect them after the provider has moved into an agent.

use super::agent::{AgentSettings, PipelineAgent, Providers};
use super::context::{ConversationContext, RenderedMessage};
use super::models::{AudioBuffer, GeneratedResponse, SynthesizedAudio, TranscriptionResult};
use super::providers::{ResponseGenerator, SpeechSynthesis, SpeechToText, TurnPolicy, VoiceActivity};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct ScriptedStt {
    text: String,
    error: Option<String>,
    language: Option<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, _audio: &AudioBuffer) -> TranscriptionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return TranscriptionResult::failed(err.clone());
        }
        let result = TranscriptionResult::from_text(self.text.clone());
        match &self.language {
            Some(lang) => result.with_language(lang.clone(), Some(0.9)),
            None => result,
        }
    }
}

#[derive(Clone, Default)]
pub struct ScriptedLlm {
    reply: String,
    panics: bool,
    calls: Arc<AtomicUsize>,
    last_rendered: Arc<Mutex<Vec<RenderedMessage>>>,
}

#[async_trait]
impl ResponseGenerator for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, context: &ConversationContext, _temperature: f32) -> GeneratedResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("scripted generator crashed");
        }
        *self.last_rendered.lock().unwrap() = context.render(true);
        GeneratedResponse::new(self.reply.clone())
    }
}

#[derive(Clone, Default)]
pub struct ScriptedTts {
    fail: bool,
    calls: Arc<AtomicUsize>,
    language: Arc<Mutex<Option<String>>>,
    voice_id: Arc<Mutex<Option<String>>>,
}

impl ScriptedTts {
    pub fn working() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SpeechSynthesis for ScriptedTts {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(
        &self,
        text: &str,
        _language: Option<&str>,
        _speed: f32,
        _pitch: f32,
    ) -> anyhow::Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("synthesis backend unavailable");
        }
        if text.trim().is_empty() {
            anyhow::bail!("cannot synthesize empty text");
        }
        Ok(SynthesizedAudio {
            audio: text.as_bytes().to_vec(),
            encoding: "mp3".to_string(),
            sample_rate: 44100,
        })
    }

    fn set_language(&mut self, language: &str) -> bool {
        *self.language.lock().unwrap() = Some(language.to_string());
        true
    }

    fn set_voice_id(&mut self, voice_id: &str) -> bool {
        *self.voice_id.lock().unwrap() = Some(voice_id.to_string());
        true
    }
}

#[derive(Clone)]
pub struct CountingVad {
    speech: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl VoiceActivity for CountingVad {
    async fn detect_speech(&self, _audio: &AudioBuffer) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.speech
    }
}

#[async_trait]
impl TurnPolicy for CountingVad {
    async fn is_turn_complete(&self, _audio: &AudioBuffer) -> bool {
        true
    }
}

/// One set of scripted providers plus handles to their counters.
#[derive(Clone)]
pub struct MockSetup {
    pub stt: ScriptedStt,
    pub llm: ScriptedLlm,
    pub tts: ScriptedTts,
    pub vad: CountingVad,
}

impl MockSetup {
    pub fn new(transcript: &str, reply: &str) -> Self {
        Self::with_tts(transcript, reply, ScriptedTts::working())
    }

    pub fn with_tts(transcript: &str, reply: &str, tts: ScriptedTts) -> Self {
        Self {
            stt: ScriptedStt {
                text: transcript.to_string(),
                ..ScriptedStt::default()
            },
            llm: ScriptedLlm {
                reply: reply.to_string(),
                ..ScriptedLlm::default()
            },
            tts,
            vad: CountingVad {
                speech: true,
                calls: Arc::default(),
            },
        }
    }

    pub fn with_stt_error(error: &str, reply: &str) -> Self {
        let mut setup = Self::new("", reply);
        setup.stt.error = Some(error.to_string());
        setup
    }

    pub fn detecting_language(mut self, language: &str) -> Self {
        self.stt.language = Some(language.to_string());
        self
    }

    pub fn crashing_llm(mut self) -> Self {
        self.llm.panics = true;
        self
    }

    pub fn without_speech(mut self) -> Self {
        self.vad.speech = false;
        self
    }

    pub fn providers(&self) -> Providers {
        Providers {
            vad: Arc::new(self.vad.clone()),
            turn_policy: Arc::new(self.vad.clone()),
            stt: Arc::new(self.stt.clone()),
            llm: Arc::new(self.llm.clone()),
            tts: Box::new(self.tts.clone()),
        }
    }

    pub fn agent(&self) -> PipelineAgent {
        PipelineAgent::new(
            "test-session",
            self.providers(),
            AgentSettings::default(),
            ConversationContext::default(),
        )
    }

    pub fn stt_calls(&self) -> usize {
        self.stt.calls.load(Ordering::SeqCst)
    }

    pub fn llm_calls(&self) -> usize {
        self.llm.calls.load(Ordering::SeqCst)
    }

    pub fn tts_calls(&self) -> usize {
        self.tts.calls.load(Ordering::SeqCst)
    }

    pub fn vad_calls(&self) -> usize {
        self.vad.calls.load(Ordering::SeqCst)
    }

    pub fn last_rendered(&self) -> Vec<RenderedMessage> {
        self.llm.last_rendered.lock().unwrap().clone()
    }

    pub fn tts_language(&self) -> Option<String> {
        self.tts.language.lock().unwrap().clone()
    }

    pub fn tts_voice(&self) -> Option<String> {
        self.tts.voice_id.lock().unwrap().clone()
    }
}
