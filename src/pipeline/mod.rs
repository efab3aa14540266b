//! # Voice Pipeline Core
//!
//! Everything that runs a conversational turn, independent of any concrete engine
//! or transport.
//!
//! ## Module Organization:
//! - `models`: values passed between stages
//! - `context`: conversation history and system prompt
//! - `providers`: capability traits implemented by engines
//! - `turn`: voice activity / end-of-turn placeholders and endpointing bounds
//! - `agent`: the per-session orchestrator

pub mod agent;
pub mod context;
pub mod models;
pub mod providers;
pub mod turn;

#[cfg(test)]
pub mod testing;

pub use agent::{AgentSettings, PipelineAgent, Providers};
pub use context::{ConversationContext, Message, RenderedMessage, DEFAULT_SYSTEM_PROMPT};
pub use models::{
    AudioBuffer, GeneratedResponse, PipelineResult, PipelineStage, SynthesizedAudio, TranscriptSegment,
    TranscriptionResult,
};
pub use providers::{ResponseGenerator, SpeechSynthesis, SpeechToText, TurnPolicy, VoiceActivity};
pub use turn::{EndOfUtteranceDetector, EndpointingPolicy, SimpleEndpointingVad};
