//! # Speech Recognition Engines
//!
//! ## Module Organization:
//! - `model`: candle Whisper loading and decoding
//! - `engine`: the local Whisper [`crate::pipeline::SpeechToText`] implementation
//! - `openai`: the hosted OpenAI-compatible implementation

pub mod engine;
pub mod model;
pub mod openai;

pub use engine::WhisperStt;
pub use model::ModelSize;
pub use openai::OpenAiStt;
