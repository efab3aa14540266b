//! # Audio Input
//!
//! Decoding of caller audio into recognizer-ready samples.

pub mod decoder;

pub use decoder::{decode, TARGET_SAMPLE_RATE};
