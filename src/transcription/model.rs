//! # Whisper Model
//!
//! Loads a Whisper checkpoint from the HuggingFace hub and runs greedy decoding over
//! one utterance with candle.
//!
//! ## Inference Steps:
//! 1. Log-mel spectrogram of at most 30 s of 16 kHz audio
//! 2. Encoder pass
//! 3. Language: the configured hint, or the most likely `<|xx|>` token after `<|startoftranscript|>`
//! 4. Greedy decoding with suppressed tokens and a repetition guard
//! 5. No-speech check on the first decoding step

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

/// Language codes in the order Whisper's multilingual vocabulary lists them.
pub const LANGUAGES: &[&str] = &[
    "en", "zh", "de", "es", "ru", "ko", "fr", "ja", "pt", "tr", "pl", "ca", "nl", "ar", "sv", "it",
    "id", "hi", "fi", "vi", "he", "uk", "el", "ms", "cs", "ro", "da", "hu", "ta", "no", "th", "ur",
    "hr", "bg", "lt", "la", "mi", "ml", "cy", "sk", "te", "fa", "lv", "bn", "sr", "az", "sl", "kn",
    "et", "mk", "br", "eu", "is", "hy", "ne", "mn", "bs", "kk", "sq", "sw", "gl", "mr", "pa", "si",
    "km", "sn", "yo", "so", "af", "oc", "ka", "be", "tg", "sd", "gu", "am", "yi", "lo", "uz", "fo",
    "ht", "ps", "tk", "nn", "mt", "sa", "lb", "my", "bo", "tl", "mg", "as", "tt", "haw", "ln",
    "ha", "ba", "jw", "su",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository holding the checkpoint.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        f.write_str(name)
    }
}

/// Raw decoder output for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub language_probability: Option<f32>,
    pub avg_logprob: f32,
    pub no_speech_prob: f32,
    pub duration_secs: f64,
}

struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
}

pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    suppress: Tensor,
    size: ModelSize,
}

impl WhisperModel {
    /// Download (or reuse the cached copy of) `size` and load it onto `device`.
    ///
    /// `HF_TOKEN` and `HF_HUB_CACHE` / `HF_HOME` are honoured.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!("Loading Whisper {} model from {}...", size, size.repo_name());
        let start_time = std::time::Instant::now();

        let api = {
            let mut builder = hf_hub::api::tokio::ApiBuilder::new().with_progress(false);
            builder = builder.with_token(std::env::var("HF_TOKEN").ok());
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            } else if let Ok(hf_home) = std::env::var("HF_HOME") {
                builder = builder.with_cache_dir(std::path::PathBuf::from(hf_home).join("hub"));
            }
            builder.build().context("failed to create HuggingFace API client")?
        };

        let repo = api.model(size.repo_name().to_string());
        let config_path = repo
            .get("config.json")
            .await
            .with_context(|| format!("failed to download config.json from {}", size.repo_name()))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("failed to download tokenizer.json from {}", size.repo_name()))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("failed to download model weights from {}", size.repo_name()))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        // SAFETY: the weights file is owned by the hub cache and not modified while mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        };

        let mut suppress = vec![0f32; config.vocab_size];
        for &id in &config.suppress_tokens {
            if let Some(slot) = suppress.get_mut(id as usize) {
                *slot = f32::NEG_INFINITY;
            }
        }
        suppress[tokens.no_timestamps as usize] = f32::NEG_INFINITY;
        let suppress = Tensor::new(suppress.as_slice(), &device)?;

        let mel_filters = mel_filter_bank(config.num_mel_bins);

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            mel_filters,
            tokens,
            suppress,
            size,
        })
    }

    /// Transcribe mono 16 kHz samples. Anything past 30 s is ignored.
    ///
    /// ## Parameters:
    /// - **samples**: `f32` in `[-1.0, 1.0]`
    /// - **language**: ISO 639-1 hint; `None` detects the language first
    pub fn transcribe(&mut self, samples: &[f32], language: Option<&str>) -> Result<Transcript> {
        let start_time = std::time::Instant::now();
        let samples = &samples[..samples.len().min(m::N_SAMPLES)];
        let duration_secs = samples.len() as f64 / m::SAMPLE_RATE as f64;

        let mel = m::audio::pcm_to_mel(&self.config, samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?;
        let mel = mel.narrow(2, 0, frames.min(m::N_FRAMES))?;

        let audio_features = self.model.encoder.forward(&mel, true)?;

        let (language_token, language, language_probability) = match language {
            Some(code) => {
                let id = token_id(&self.tokenizer, &format!("<|{}|>", code))?;
                (id, code.to_string(), None)
            }
            None => {
                let (id, code, prob) = self.detect_language(&audio_features)?;
                (id, code, Some(prob))
            }
        };

        let (text, avg_logprob, no_speech_prob) = self.decode_greedy(&audio_features, language_token)?;

        tracing::debug!(
            model = %self.size,
            language = %language,
            avg_logprob,
            no_speech_prob,
            "transcribed {:.2}s of audio in {:.2}s",
            duration_secs,
            start_time.elapsed().as_secs_f64()
        );

        let text = if no_speech_prob > m::NO_SPEECH_THRESHOLD as f32 && avg_logprob < m::LOGPROB_THRESHOLD as f32 {
            String::new()
        } else {
            text
        };

        Ok(Transcript {
            text,
            language: Some(language),
            language_probability,
            avg_logprob,
            no_speech_prob,
            duration_secs,
        })
    }

    /// Most likely language token after `<|startoftranscript|>`.
    fn detect_language(&mut self, audio_features: &Tensor) -> Result<(u32, String, f32)> {
        let candidates: Vec<(&str, u32)> = LANGUAGES
            .iter()
            .filter_map(|code| {
                self.tokenizer
                    .token_to_id(&format!("<|{}|>", code))
                    .map(|id| (*code, id))
            })
            .collect();
        if candidates.is_empty() {
            return Err(anyhow!("model vocabulary has no language tokens"));
        }

        let ids: Vec<u32> = candidates.iter().map(|(_, id)| *id).collect();
        let tokens = Tensor::new(&[[self.tokens.sot]], &self.device)?;
        let ys = self.model.decoder.forward(&tokens, audio_features, true)?;
        let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
        let logits = logits.index_select(&Tensor::new(ids.as_slice(), &self.device)?, 0)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

        let (best, prob) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| anyhow!("empty language distribution"))?;

        let (code, id) = candidates[best];
        Ok((id, code.to_string(), prob))
    }

    /// Returns the text, average token log-probability and the no-speech probability.
    fn decode_greedy(&mut self, audio_features: &Tensor, language_token: u32) -> Result<(String, f32, f32)> {
        let mut tokens = vec![
            self.tokens.sot,
            language_token,
            self.tokens.transcribe,
            self.tokens.no_timestamps,
        ];
        let prompt_len = tokens.len();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = 0f32;
        let max_steps = self.config.max_target_positions / 2;

        for step in 0..max_steps {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, audio_features, step == 0)?;

            if step == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let first = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = candle_nn::ops::softmax(&first, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()?;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .broadcast_add(&self.suppress)?;

            let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;
            let (next, prob) = probs
                .iter()
                .copied()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(i, p)| (i as u32, p))
                .ok_or_else(|| anyhow!("empty logits"))?;

            if next == self.tokens.eot || is_repetitive(&tokens[prompt_len..], next) {
                break;
            }

            sum_logprob += (prob.max(f32::MIN_POSITIVE) as f64).ln();
            tokens.push(next);
        }

        let generated = &tokens[prompt_len..];
        let avg_logprob = if generated.is_empty() {
            0.0
        } else {
            (sum_logprob / generated.len() as f64) as f32
        };

        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;

        Ok((text.trim().to_string(), avg_logprob, no_speech_prob))
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("no token-id for {}", token))
}

/// True when appending `next` would loop: three identical tokens in a row, or the last
/// three tokens repeating the three before them.
fn is_repetitive(generated: &[u32], next: u32) -> bool {
    let n = generated.len();
    if n >= 2 && generated[n - 2..].iter().all(|&t| t == next) {
        return true;
    }
    if n >= 5 {
        let last_3 = [generated[n - 2], generated[n - 1], next];
        if generated[n - 5..n - 2] == last_3 {
            return true;
        }
    }
    false
}

/// Triangular mel filters over the `N_FFT / 2 + 1` frequency bins, row-major by mel band.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    let sample_rate = m::SAMPLE_RATE as f32;
    let n_freqs = m::N_FFT / 2 + 1;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(sample_rate / 2.0);
    let bins: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32) * m::N_FFT as f32 / sample_rate)
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (left, center, right) = (bins[band], bins[band + 1], bins[band + 2]);
        for k in 0..n_freqs {
            let k_f = k as f32;
            let weight = if k_f >= left && k_f <= center && center > left {
                (k_f - left) / (center - left)
            } else if k_f > center && k_f <= right && right > center {
                (right - k_f) / (right - center)
            } else {
                0.0
            };
            filters[band * n_freqs + k] = weight;
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("huge".parse::<ModelSize>().is_err());
        assert_eq!(ModelSize::Base.to_string(), "base");
        assert_eq!(ModelSize::Large.repo_name(), "openai/whisper-large-v2");
    }

    #[test]
    fn test_repetition_guard() {
        assert!(!is_repetitive(&[], 5));
        assert!(is_repetitive(&[7, 7], 7));
        assert!(!is_repetitive(&[7, 8], 7));
        assert!(is_repetitive(&[1, 2, 3, 1, 2], 3));
        assert!(!is_repetitive(&[1, 2, 3, 1, 2], 4));
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let filters = mel_filter_bank(80);
        assert_eq!(filters.len(), 80 * (m::N_FFT / 2 + 1));
        assert!(filters.iter().all(|w| (0.0..=1.0).contains(w)));
        // every band has some weight
        for band in filters.chunks(m::N_FFT / 2 + 1) {
            assert!(band.iter().any(|&w| w > 0.0));
        }
    }

    #[test]
    fn test_language_table_has_targets() {
        for code in ["en", "es", "fr", "de", "it"] {
            assert!(LANGUAGES.contains(&code));
        }
    }
}
