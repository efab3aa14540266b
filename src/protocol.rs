//! # Assistant Wire Protocol
//!
//! Payloads exchanged on `/ws/assistant` and the per-frame handling that turns them into
//! agent calls. Nothing here knows about actors or sockets: every handler takes the
//! session's agent and returns the frames to send back, in order.
//!
//! ## Client → Server:
//! - Binary frame: one complete utterance (WAV, or raw PCM16 in the configured format)
//! - `{"type":"config","config":{"system_prompt":..,"voice":{"voice_id":..}}}`
//! - `{"type":"history","action":"clear"|"get"}`
//! - `{"type":"text_input","text":..,"tts":true}`
//! - Any other text is conversational input
//!
//! ## Server → Client:
//! - `transcription`, `text_response`, `config_updated`, `history_cleared`, `history`, `error`
//! - `audio_response` announcing the encoding, immediately followed by the binary audio

use crate::pipeline::{AudioBuffer, Message, PipelineAgent, PipelineResult, PipelineStage, SynthesizedAudio};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config {
        #[serde(default)]
        config: SessionConfig,
    },
    History {
        action: HistoryAction,
    },
    TextInput {
        #[serde(default)]
        text: String,
        #[serde(default = "default_tts")]
        tts: bool,
    },
}

fn default_tts() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub voice: Option<VoiceConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Clear,
    Get,
}

/// A text frame after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(ClientMessage),
    PlainText(String),
}

/// Anything that is not a recognised control message is conversational text.
pub fn parse_text_frame(text: &str) -> Inbound {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Inbound::Control(message),
        Err(err) => {
            debug!("Text frame is not a control message ({}), treating as input", err);
            Inbound::PlainText(text.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Transcription {
        text: String,
        language: Option<String>,
    },
    TextResponse {
        text: String,
    },
    /// Sent right before the binary frame it describes.
    AudioResponse {
        subprotocol: String,
        sample_rate: u32,
        bytes: usize,
    },
    ConfigUpdated {
        success: bool,
    },
    HistoryCleared {
        success: bool,
    },
    History {
        data: Vec<Message>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

/// One frame to write to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

impl From<ServerEvent> for Outbound {
    fn from(event: ServerEvent) -> Self {
        match serde_json::to_string(&event) {
            Ok(json) => Outbound::Text(json),
            Err(err) => {
                warn!("Failed to serialize server event: {}", err);
                Outbound::Text(r#"{"type":"error","message":"internal serialization error"}"#.to_string())
            }
        }
    }
}

/// How a turn ended, for the service counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Aborted,
    /// Text answer produced, audio not.
    SynthesisFailed,
}

impl TurnOutcome {
    fn of(result: &PipelineResult) -> Self {
        match result.stage {
            PipelineStage::Done => TurnOutcome::Completed,
            _ if result.llm_response.is_some() => TurnOutcome::SynthesisFailed,
            _ => TurnOutcome::Aborted,
        }
    }
}

/// Frames produced for one inbound frame.
#[derive(Debug, Default)]
pub struct Reply {
    pub frames: Vec<Outbound>,
    pub turn: Option<TurnOutcome>,
}

impl Reply {
    fn event(event: ServerEvent) -> Self {
        Self {
            frames: vec![event.into()],
            turn: None,
        }
    }

    fn push(&mut self, event: ServerEvent) {
        self.frames.push(event.into());
    }

    fn push_audio(&mut self, audio: SynthesizedAudio) {
        self.push(ServerEvent::AudioResponse {
            subprotocol: audio.subprotocol(),
            sample_rate: audio.sample_rate,
            bytes: audio.audio.len(),
        });
        self.frames.push(Outbound::Binary(audio.audio));
    }
}

/// Run one spoken turn.
///
/// A detected language steers the prompt and the synthesis voice from the next turn on.
pub async fn handle_audio(agent: &mut PipelineAgent, audio: AudioBuffer) -> Reply {
    info!(connection_id = %agent.session_id(), bytes = audio.len(), "Received audio data");
    let result = agent.process_audio(audio).await;
    let outcome = TurnOutcome::of(&result);

    let mut reply = Reply::default();
    let detected_language = result
        .transcription
        .as_ref()
        .and_then(|t| t.language.clone())
        .filter(|l| !l.is_empty());

    if let Some(transcription) = result.transcription {
        reply.push(ServerEvent::Transcription {
            text: transcription.text,
            language: detected_language.clone(),
        });
    }

    if let Some(response) = result.llm_response {
        if let Some(language) = &detected_language {
            info!(connection_id = %agent.session_id(), language = %language, "Detected language");
            agent.apply_language_preference(language);
        }
        reply.push(ServerEvent::TextResponse { text: response.text });
    }

    if let Some(audio) = result.audio_response {
        reply.push_audio(audio);
    }

    reply.turn = Some(outcome);
    reply
}

/// Handle one text frame.
pub async fn handle_text(agent: &mut PipelineAgent, text: &str) -> Reply {
    match parse_text_frame(text) {
        Inbound::Control(message) => handle_control(agent, message).await,
        Inbound::PlainText(text) => {
            let result = agent.process_text(&text).await;
            let mut reply = Reply {
                turn: Some(TurnOutcome::of(&result)),
                ..Reply::default()
            };
            if let Some(response) = result.llm_response {
                reply.push(ServerEvent::TextResponse { text: response.text });
            }
            reply
        }
    }
}

async fn handle_control(agent: &mut PipelineAgent, message: ClientMessage) -> Reply {
    match message {
        ClientMessage::Config { config } => {
            if let Some(prompt) = config.system_prompt {
                agent.update_system_prompt(prompt);
            }
            if let Some(voice_id) = config.voice.and_then(|v| v.voice_id) {
                if !agent.set_voice_id(&voice_id) {
                    warn!(connection_id = %agent.session_id(), "Synthesizer does not support voice selection");
                }
            }
            Reply::event(ServerEvent::ConfigUpdated { success: true })
        }
        ClientMessage::History { action: HistoryAction::Clear } => {
            agent.clear_conversation();
            Reply::event(ServerEvent::HistoryCleared { success: true })
        }
        ClientMessage::History { action: HistoryAction::Get } => Reply::event(ServerEvent::History {
            data: agent.history().to_vec(),
        }),
        ClientMessage::TextInput { text, tts } => {
            if text.is_empty() {
                return Reply::default();
            }
            let result = agent.process_text(&text).await;
            let mut reply = Reply {
                turn: Some(TurnOutcome::of(&result)),
                ..Reply::default()
            };
            if let Some(response) = result.llm_response {
                reply.push(ServerEvent::TextResponse { text: response.text });
            }
            if tts {
                if let Some(audio) = result.audio_response {
                    reply.push_audio(audio);
                }
            }
            reply
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{MockSetup, ScriptedTts};
    use serde_json::Value;

    fn json(frame: &Outbound) -> Value {
        match frame {
            Outbound::Text(text) => serde_json::from_str(text).unwrap(),
            Outbound::Binary(_) => panic!("expected a text frame"),
        }
    }

    fn wav_buffer() -> AudioBuffer {
        AudioBuffer::wav(vec![0u8; 64], 16000, 1)
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            parse_text_frame(r#"{"type":"history","action":"clear"}"#),
            Inbound::Control(ClientMessage::History {
                action: HistoryAction::Clear
            })
        );
        assert_eq!(
            parse_text_frame(r#"{"type":"text_input","text":"hi"}"#),
            Inbound::Control(ClientMessage::TextInput {
                text: "hi".to_string(),
                tts: true
            })
        );
        match parse_text_frame(r#"{"type":"config","config":{"voice":{"voice_id":"v2"}}}"#) {
            Inbound::Control(ClientMessage::Config { config }) => {
                assert_eq!(config.system_prompt, None);
                assert_eq!(config.voice.unwrap().voice_id.as_deref(), Some("v2"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unrecognised_payloads_are_plain_text() {
        for raw in ["hello there", r#"{"type":"dance"}"#, r#"{"type":"history","action":"undo"}"#, "{oops"] {
            assert_eq!(parse_text_frame(raw), Inbound::PlainText(raw.to_string()));
        }
    }

    #[test]
    fn test_event_shapes() {
        let event = json(&ServerEvent::Transcription {
            text: "hola".to_string(),
            language: None,
        }
        .into());
        assert_eq!(event["type"], "transcription");
        assert_eq!(event["text"], "hola");
        assert!(event["language"].is_null());

        let event = json(&ServerEvent::error("boom").into());
        assert_eq!(event, serde_json::json!({"type": "error", "message": "boom"}));
    }

    #[tokio::test]
    async fn test_audio_turn_frames_in_order() {
        let setup = MockSetup::new("hello", "hi there");
        let mut agent = setup.agent();

        let reply = handle_audio(&mut agent, wav_buffer()).await;

        assert_eq!(reply.turn, Some(TurnOutcome::Completed));
        assert_eq!(reply.frames.len(), 4);
        assert_eq!(json(&reply.frames[0])["type"], "transcription");
        assert_eq!(json(&reply.frames[1])["text"], "hi there");
        let meta = json(&reply.frames[2]);
        assert_eq!(meta["type"], "audio_response");
        assert_eq!(meta["subprotocol"], "audio/mp3");
        assert_eq!(meta["bytes"], 8);
        assert_eq!(reply.frames[3], Outbound::Binary(b"hi there".to_vec()));
    }

    #[tokio::test]
    async fn test_silent_audio_only_reports_empty_transcription() {
        let setup = MockSetup::new("", "unused");
        let mut agent = setup.agent();

        let reply = handle_audio(&mut agent, wav_buffer()).await;

        assert_eq!(reply.turn, Some(TurnOutcome::Aborted));
        assert_eq!(reply.frames.len(), 1);
        assert_eq!(json(&reply.frames[0])["text"], "");
        assert_eq!(setup.llm_calls(), 0);
    }

    #[tokio::test]
    async fn test_detected_language_applies_from_next_turn() {
        let setup = MockSetup::new("hola", "hola amigo").detecting_language("es");
        let mut agent = setup.agent();

        let reply = handle_audio(&mut agent, wav_buffer()).await;
        assert_eq!(json(&reply.frames[0])["language"], "es");
        // the first generation saw the original prompt
        assert!(!setup.last_rendered()[0].content.starts_with("Respond in"));
        assert_eq!(setup.tts_language().as_deref(), Some("es"));

        handle_audio(&mut agent, wav_buffer()).await;
        let prompt = setup.last_rendered()[0].content.clone();
        assert!(prompt.starts_with("Respond in es language. "));
        assert_eq!(prompt.matches("Respond in").count(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_still_sends_text() {
        let setup = MockSetup::with_tts("hello", "hi there", ScriptedTts::failing());
        let mut agent = setup.agent();

        let reply = handle_audio(&mut agent, wav_buffer()).await;

        assert_eq!(reply.turn, Some(TurnOutcome::SynthesisFailed));
        assert_eq!(reply.frames.len(), 2);
        assert_eq!(json(&reply.frames[1])["type"], "text_response");
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn test_text_input_respects_tts_flag() {
        let setup = MockSetup::new("", "sure");
        let mut agent = setup.agent();

        let with_audio = handle_text(&mut agent, r#"{"type":"text_input","text":"hi"}"#).await;
        assert_eq!(with_audio.frames.len(), 3);

        let silent = handle_text(&mut agent, r#"{"type":"text_input","text":"hi","tts":false}"#).await;
        assert_eq!(silent.frames.len(), 1);
        assert_eq!(json(&silent.frames[0])["type"], "text_response");

        let empty = handle_text(&mut agent, r#"{"type":"text_input","text":""}"#).await;
        assert!(empty.frames.is_empty());
        assert!(empty.turn.is_none());
        assert_eq!(setup.llm_calls(), 2);
    }

    #[tokio::test]
    async fn test_plain_text_gets_text_reply_only() {
        let setup = MockSetup::new("", "hello human");
        let mut agent = setup.agent();

        let reply = handle_text(&mut agent, "hello robot").await;

        assert_eq!(reply.frames.len(), 1);
        assert_eq!(json(&reply.frames[0])["text"], "hello human");
        assert_eq!(agent.history()[0].content, "hello robot");
    }

    #[tokio::test]
    async fn test_config_and_history_commands() {
        let setup = MockSetup::new("", "ok");
        let mut agent = setup.agent();

        let reply = handle_text(
            &mut agent,
            r#"{"type":"config","config":{"system_prompt":"be terse","voice":{"voice_id":"v9"}}}"#,
        )
        .await;
        assert_eq!(json(&reply.frames[0]), serde_json::json!({"type": "config_updated", "success": true}));
        assert_eq!(agent.context().system_prompt(), "be terse");
        assert_eq!(setup.tts_voice().as_deref(), Some("v9"));

        handle_text(&mut agent, "first").await;
        let history = handle_text(&mut agent, r#"{"type":"history","action":"get"}"#).await;
        assert_eq!(
            json(&history.frames[0])["data"],
            serde_json::json!([
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "ok"}
            ])
        );

        let cleared = handle_text(&mut agent, r#"{"type":"history","action":"clear"}"#).await;
        assert_eq!(json(&cleared.frames[0])["type"], "history_cleared");
        assert!(agent.history().is_empty());
        assert_eq!(agent.context().system_prompt(), "be terse");
    }
}
