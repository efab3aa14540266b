//! # Audio Decoding
//!
//! Turns an inbound [`AudioBuffer`] into the mono, 16 kHz, `f32` samples the speech
//! recognizer expects.
//!
//! ## Accepted Inputs:
//! - **WAV containers** (`RIFF` header): 8/16/24-bit integer or 32-bit float PCM, any
//!   channel count and sample rate
//! - **Raw PCM**: 16-bit little-endian samples interpreted with the buffer's declared
//!   sample rate and channel count
//!
//! ## Processing Steps:
//! 1. Decode to interleaved `f32` in `[-1.0, 1.0]`
//! 2. Downmix to mono by averaging channels
//! 3. Remove DC offset
//! 4. Linearly resample to [`TARGET_SAMPLE_RATE`]

use crate::pipeline::AudioBuffer;
use anyhow::{anyhow, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Decoded audio ready for feature extraction.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / TARGET_SAMPLE_RATE as f64
    }
}

/// Decode `audio` into mono 16 kHz samples.
///
/// ## Returns:
/// - **Ok(DecodedAudio)**: possibly empty when the buffer holds no samples
/// - **Err**: malformed WAV data or odd-length raw PCM
pub fn decode(audio: &AudioBuffer) -> Result<DecodedAudio> {
    if audio.is_empty() {
        return Ok(DecodedAudio { samples: Vec::new() });
    }

    let data = audio.data();
    let (interleaved, sample_rate, channels) = if is_wav(data) {
        decode_wav(data)?
    } else {
        (decode_pcm16(data)?, audio.sample_rate(), audio.channels())
    };

    if sample_rate == 0 || channels == 0 {
        return Err(anyhow!(
            "invalid audio format: {} Hz, {} channel(s)",
            sample_rate,
            channels
        ));
    }

    let mut mono = downmix(&interleaved, channels as usize);
    remove_dc_offset(&mut mono);
    let samples = resample_linear(&mono, sample_rate, TARGET_SAMPLE_RATE);

    tracing::debug!(
        encoding = audio.encoding(),
        source_rate = sample_rate,
        source_channels = channels,
        samples = samples.len(),
        "decoded audio"
    );

    Ok(DecodedAudio { samples })
}

fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32, u16)> {
    let mut cursor = Cursor::new(data);
    let (header, body) = wav::read(&mut cursor).context("failed to parse WAV data")?;

    let samples: Vec<f32> = match body {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok((samples, header.sampling_rate, header.channel_count))
}

/// Raw 16-bit little-endian PCM to `f32`.
fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(anyhow!("raw PCM length must be even for 16-bit samples"));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn remove_dc_offset(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= mean;
    }
}

/// Linear-interpolation resampler. Good enough for speech going into Whisper.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
