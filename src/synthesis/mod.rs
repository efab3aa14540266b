//! # Speech Synthesis Engines
//!
//! Hosted TTS vendors behind [`crate::pipeline::SpeechSynthesis`]. Each session gets
//! its own instance so voice and language changes stay within that session.
//!
//! ## Shared Rules:
//! - Languages are reduced to a base code (`en-US` → `en`, `english` → `en`) and checked
//!   against [`SUPPORTED_LANGUAGES`]; anything else falls back to the default with a warning
//! - Empty text, a missing voice, a failed request or an empty audio body are errors

pub mod cartesia;
pub mod elevenlabs;

pub use cartesia::CartesiaTts;
pub use elevenlabs::ElevenLabsTts;

use crate::language::normalize_language;
use anyhow::{anyhow, Result};

pub const SUPPORTED_LANGUAGES: &[&str] = &["en", "es", "fr", "de", "it"];
pub const DEFAULT_LANGUAGE: &str = "en";

/// mp3 at 44.1 kHz is what both vendors are asked for.
pub const OUTPUT_ENCODING: &str = "mp3";
pub const OUTPUT_SAMPLE_RATE: u32 = 44100;

/// Pick the language for one synthesis call.
///
/// `requested` wins over `current`; an unsupported result becomes [`DEFAULT_LANGUAGE`].
pub fn resolve_language(requested: Option<&str>, current: &str) -> String {
    let raw = requested.filter(|l| !l.trim().is_empty()).unwrap_or(current);
    let code = normalize_language(raw);
    if SUPPORTED_LANGUAGES.contains(&code.as_str()) {
        code
    } else {
        tracing::warn!("Language '{}' not supported, defaulting to {}", raw, DEFAULT_LANGUAGE);
        DEFAULT_LANGUAGE.to_string()
    }
}

/// Vendor speed preset for a numeric multiplier.
pub fn speed_preset(speed: f32) -> &'static str {
    if speed < 0.8 {
        "slow"
    } else if speed > 1.2 {
        "fast"
    } else {
        "normal"
    }
}

fn ensure_request(text: &str, voice_id: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(anyhow!("cannot synthesize empty text"));
    }
    if voice_id.is_empty() {
        return Err(anyhow!("no voice id configured for synthesis"));
    }
    Ok(())
}

fn ensure_audio(audio: Vec<u8>) -> Result<Vec<u8>> {
    if audio.is_empty() {
        Err(anyhow!("synthesis returned no audio"))
    } else {
        Ok(audio)
    }
}
