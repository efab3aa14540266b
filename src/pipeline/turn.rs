//! # Turn Detection
//!
//! Voice activity and end-of-utterance slots. The shipped implementations are
//! placeholders that always report speech and a finished turn; real acoustic
//! detectors plug in through the same traits.

use super::models::AudioBuffer;
use super::providers::{TurnPolicy, VoiceActivity};
use async_trait::async_trait;
use serde::Serialize;

/// Energy-threshold VAD settings. Detection itself is not implemented yet.
#[derive(Debug, Clone)]
pub struct SimpleEndpointingVad {
    pub silence_threshold: f32,
    /// Seconds of speech required before a buffer counts as an utterance.
    pub min_speech_duration: f32,
}

impl Default for SimpleEndpointingVad {
    fn default() -> Self {
        Self {
            silence_threshold: 0.1,
            min_speech_duration: 0.3,
        }
    }
}

#[async_trait]
impl VoiceActivity for SimpleEndpointingVad {
    async fn detect_speech(&self, audio: &AudioBuffer) -> bool {
        tracing::trace!(
            bytes = audio.len(),
            threshold = self.silence_threshold,
            min_speech = self.min_speech_duration,
            "vad placeholder: reporting speech"
        );
        true
    }
}

/// End-of-utterance slot bounded by an [`EndpointingPolicy`].
#[derive(Debug, Clone, Default)]
pub struct EndOfUtteranceDetector {
    policy: EndpointingPolicy,
}

impl EndOfUtteranceDetector {
    pub fn new(policy: EndpointingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> EndpointingPolicy {
        self.policy
    }
}

#[async_trait]
impl TurnPolicy for EndOfUtteranceDetector {
    async fn is_turn_complete(&self, audio: &AudioBuffer) -> bool {
        // no trailing-silence measurement yet, so every buffer has waited the minimum
        let waited = self.policy.clamp(0.0);
        tracing::trace!(
            bytes = audio.len(),
            waited,
            max_delay = self.policy.max_delay,
            "turn placeholder: reporting complete"
        );
        true
    }
}

/// Bounds (seconds) on how long to wait before declaring a turn finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EndpointingPolicy {
    pub min_delay: f32,
    pub max_delay: f32,
}

impl Default for EndpointingPolicy {
    fn default() -> Self {
        Self {
            min_delay: 0.5,
            max_delay: 5.0,
        }
    }
}

impl EndpointingPolicy {
    pub fn new(min_delay: f32, max_delay: f32) -> anyhow::Result<Self> {
        if min_delay < 0.0 || max_delay < 0.0 {
            anyhow::bail!("endpointing delays must not be negative");
        }
        if min_delay > max_delay {
            anyhow::bail!(
                "min endpointing delay ({}) exceeds max endpointing delay ({})",
                min_delay,
                max_delay
            );
        }
        Ok(Self { min_delay, max_delay })
    }

    /// Clamp an observed silence duration into the configured window.
    pub fn clamp(&self, silence: f32) -> f32 {
        silence.clamp(self.min_delay, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_placeholders_always_accept() {
        let silence = AudioBuffer::wav(Vec::new(), 16000, 1);
        assert!(SimpleEndpointingVad::default().detect_speech(&silence).await);
        assert!(EndOfUtteranceDetector::default().is_turn_complete(&silence).await);
    }

    #[tokio::test]
    async fn test_detector_keeps_configured_bounds() {
        let policy = EndpointingPolicy::new(1.0, 3.0).unwrap();
        let detector = EndOfUtteranceDetector::new(policy);

        assert_eq!(detector.policy(), policy);
        assert!(detector.is_turn_complete(&AudioBuffer::wav(vec![0; 32], 16000, 1)).await);
    }

    #[test]
    fn test_endpointing_bounds() {
        assert!(EndpointingPolicy::new(2.0, 1.0).is_err());
        assert!(EndpointingPolicy::new(-1.0, 1.0).is_err());

        let policy = EndpointingPolicy::new(0.5, 5.0).unwrap();
        assert_eq!(policy, EndpointingPolicy::default());
        assert_eq!(policy.clamp(0.1), 0.5);
        assert_eq!(policy.clamp(9.0), 5.0);
        assert_eq!(policy.clamp(1.5), 1.5);
    }
}
