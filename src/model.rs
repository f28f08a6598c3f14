//! Interfaces to the external neural models.
//!
//! The mel model and vocoder are opaque functions:
//!
//! ```text
//! mel      = mel_model.generate(tokens, speaker_embedding, speed)
//! waveform = vocoder.vocode(mel)
//! ```
//!
//! A [`ModelLoader`] turns the artifacts found under the models directory
//! into those trait objects.  The ONNX Runtime implementation lives in
//! [`crate::onnx`] (feature `onnx`); tests use in-process fakes.

use std::path::Path;

use crate::config::Device;
use crate::embedding::{self, SpeakerEmbedding};
use crate::phonemize::Phonemizer;
use crate::prepare::TokenTensor;

/// A mel spectrogram, `[n_mels, frames]` in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Mel {
    pub n_mels: usize,
    pub frames: usize,
    pub data: Vec<f32>,
}

impl Mel {
    pub fn new(n_mels: usize, frames: usize, data: Vec<f32>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            data.len() == n_mels * frames,
            "mel data has {} values, expected {} x {}",
            data.len(),
            n_mels,
            frames
        );
        Ok(Self { n_mels, frames, data })
    }
}

/// Text-to-mel model.
pub trait MelModel: Send + Sync {
    /// `speed` is passed through unchanged; 1.0 is the normal rate.
    fn generate(&self, tokens: &TokenTensor, speaker: &SpeakerEmbedding, speed: f32) -> anyhow::Result<Mel>;
}

/// Mel-to-waveform model.  Returns samples in `[-1.0, 1.0]` at
/// [`crate::audio::SAMPLE_RATE`].
pub trait Vocoder: Send + Sync {
    fn vocode(&self, mel: &Mel) -> anyhow::Result<Vec<f32>>;
}

/// Loads model artifacts onto a device.
///
/// Paths have already been checked for existence when these are called.
pub trait ModelLoader {
    fn load_mel_model(&self, path: &Path, device: Device) -> anyhow::Result<Box<dyn MelModel>>;

    fn load_vocoder(&self, path: &Path, device: Device) -> anyhow::Result<Box<dyn Vocoder>>;

    /// `checkpoint` is the G2P artifact; `language` scopes phonemisation.
    fn load_phonemizer(
        &self,
        checkpoint: &Path,
        language: &str,
        device: Device,
    ) -> anyhow::Result<Box<dyn Phonemizer>>;

    fn load_speaker_embedding(&self, path: &Path, device: Device) -> anyhow::Result<SpeakerEmbedding> {
        embedding::load(path, device)
    }
}
