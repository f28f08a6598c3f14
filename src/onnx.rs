//! ONNX Runtime backend for the mel model and vocoder.
//!
//! Both graphs take positional inputs:
//!
//! | Graph     | Inputs                                                         | Output 0                  |
//! |-----------|----------------------------------------------------------------|---------------------------|
//! | mel model | `input_ids [1, n] i64`, `speaker [1, d] f32`, `speed [1] f32` | mel `[1, n_mels, frames]` |
//! | vocoder   | mel `[1, n_mels, frames] f32`                                  | waveform `[.., samples]`  |
//!
//! The artifacts keep their fixed names under the models directory
//! (`glados-new.pt`, `vocoder-gpu.pt`); they must contain ONNX graphs.

use std::{path::Path, sync::Mutex};

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use ort::{session::Session, value::Tensor};

use crate::config::Device;
use crate::embedding::SpeakerEmbedding;
use crate::model::{Mel, MelModel, ModelLoader, Vocoder};
use crate::phonemize::Phonemizer;
use crate::prepare::TokenTensor;

fn open_session(path: &Path, device: Device) -> Result<Mutex<Session>> {
    if device != Device::Cpu {
        warn!("device {device} requested; this build runs ONNX models on the CPU");
    }
    let session = Session::builder()
        .context("Failed to create ORT session builder")?
        .commit_from_file(path)
        .with_context(|| format!("Cannot load ONNX model: {}", path.display()))?;
    debug!("loaded ONNX graph {}", path.display());
    Ok(Mutex::new(session))
}

// ─────────────────────────────────────────────────────────────────────────────
// Mel model
// ─────────────────────────────────────────────────────────────────────────────

pub struct OnnxMelModel {
    session: Mutex<Session>,
}

impl OnnxMelModel {
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        Ok(Self { session: open_session(path, device)? })
    }
}

impl MelModel for OnnxMelModel {
    fn generate(&self, tokens: &TokenTensor, speaker: &SpeakerEmbedding, speed: f32) -> Result<Mel> {
        let [batch, seq_len] = tokens.shape();
        let t_input_ids = Tensor::<i64>::from_array(([batch, seq_len], tokens.ids().to_vec()))
            .context("Failed to build input_ids tensor")?;
        let t_speaker = Tensor::<f32>::from_array(([1usize, speaker.dim()], speaker.as_slice().to_vec()))
            .context("Failed to build speaker tensor")?;
        let t_speed = Tensor::<f32>::from_array(([1usize], vec![speed]))
            .context("Failed to build speed tensor")?;

        let mut session = self.session.lock().map_err(|_| anyhow!("ORT session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![t_input_ids, t_speaker, t_speed])
            .context("mel model inference failed")?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract mel tensor")?;
        let (n_mels, frames) = match shape.len() {
            3 => (shape[1] as usize, shape[2] as usize),
            2 => (shape[0] as usize, shape[1] as usize),
            _ => bail!("unexpected mel shape {:?}", shape),
        };
        Mel::new(n_mels, frames, data.to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vocoder
// ─────────────────────────────────────────────────────────────────────────────

pub struct OnnxVocoder {
    session: Mutex<Session>,
}

impl OnnxVocoder {
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        Ok(Self { session: open_session(path, device)? })
    }
}

impl Vocoder for OnnxVocoder {
    fn vocode(&self, mel: &Mel) -> Result<Vec<f32>> {
        let t_mel = Tensor::<f32>::from_array(([1usize, mel.n_mels, mel.frames], mel.data.clone()))
            .context("Failed to build mel tensor")?;

        let mut session = self.session.lock().map_err(|_| anyhow!("ORT session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![t_mel])
            .context("vocoder inference failed")?;

        // Output 0 is the waveform, e.g. [1, 1, T], [1, T] or [T].
        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract waveform tensor")?;
        Ok(audio.to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Loads the mel model and vocoder as ONNX graphs and phonemises with
/// espeak-ng (feature `espeak`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load_mel_model(&self, path: &Path, device: Device) -> Result<Box<dyn MelModel>> {
        Ok(Box::new(OnnxMelModel::load(path, device)?))
    }

    fn load_vocoder(&self, path: &Path, device: Device) -> Result<Box<dyn Vocoder>> {
        Ok(Box::new(OnnxVocoder::load(path, device)?))
    }

    #[cfg(feature = "espeak")]
    fn load_phonemizer(&self, _checkpoint: &Path, language: &str, _device: Device) -> Result<Box<dyn Phonemizer>> {
        Ok(Box::new(crate::phonemize::EspeakPhonemizer::new(language)?))
    }

    #[cfg(not(feature = "espeak"))]
    fn load_phonemizer(&self, _checkpoint: &Path, language: &str, _device: Device) -> Result<Box<dyn Phonemizer>> {
        bail!("cannot phonemize {language:?}: built without the `espeak` feature")
    }
}
