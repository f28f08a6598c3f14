//! Runtime configuration and model artifact layout.
//!
//! [`Config`] is read from a JSON file (every field optional) and then
//! overridden from the command line.  [`ModelPaths`] resolves the fixed
//! artifact names under the models directory and fails fast, naming the
//! path, when one is missing.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::Deserialize;

use crate::cleaners::CleanerKind;
use crate::error::{Result, TtsError};

// ─────────────────────────────────────────────────────────────────────────────
// Artifact layout
// ─────────────────────────────────────────────────────────────────────────────

pub const EMBEDDING_DIR: &str = "emb";
pub const PRIMARY_EMBEDDING: &str = "glados_p2.pt";
pub const ALTERNATE_EMBEDDING: &str = "glados_p1.pt";
pub const MEL_MODEL: &str = "glados-new.pt";
pub const VOCODER: &str = "vocoder-gpu.pt";
pub const PHONEMIZER_CHECKPOINT: &str = "en_us_cmudict_ipa_forward.pt";

/// Fail with [`TtsError::ModelNotFound`] unless `path` is an existing file.
pub fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(TtsError::ModelNotFound(path.to_path_buf()))
    }
}

/// Resolved locations of every model artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub embedding: PathBuf,
    pub mel_model: PathBuf,
    pub vocoder: PathBuf,
    pub phonemizer: PathBuf,
}

impl ModelPaths {
    pub fn new(models_dir: &Path, use_alternate_embedding: bool) -> Self {
        let embedding = if use_alternate_embedding { ALTERNATE_EMBEDDING } else { PRIMARY_EMBEDDING };
        Self {
            embedding: models_dir.join(EMBEDDING_DIR).join(embedding),
            mel_model: models_dir.join(MEL_MODEL),
            vocoder: models_dir.join(VOCODER),
            phonemizer: models_dir.join(PHONEMIZER_CHECKPOINT),
        }
    }

    /// Check every artifact the pipeline will load, in load order.
    pub fn require(&self, use_phonemes: bool) -> Result<()> {
        require_file(&self.embedding)?;
        require_file(&self.mel_model)?;
        require_file(&self.vocoder)?;
        if use_phonemes {
            require_file(&self.phonemizer)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

/// Compute device for model inputs.  Chosen once by the caller and passed
/// through unchanged; nothing in this crate probes hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            other => Err(TtsError::InvalidConfig(format!(
                "unknown device {:?}; expected cpu, cuda or mps",
                other
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

/// External audio player invocation: `program args... <file.wav>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `emb/`, the mel model, vocoder and G2P checkpoint.
    pub models_directory: PathBuf,

    /// Use `emb/glados_p1.pt` instead of `emb/glados_p2.pt`.
    pub use_alternate_embedding: bool,

    /// Emit per-stage latency logs.
    pub verbose_timing: bool,

    /// Passed through to the mel model; 1.0 is the normal rate.
    pub speed_factor: f32,

    pub inter_sentence_pause_seconds: f64,

    /// Where the whole-utterance WAV is written; `None` disables export.
    pub output_path: Option<PathBuf>,

    pub cleaner: CleanerKind,
    pub use_phonemes: bool,
    pub language: String,
    pub device: Device,

    /// `None` picks the platform default player.
    pub player: Option<PlayerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            models_directory: PathBuf::from("models"),
            use_alternate_embedding: false,
            verbose_timing: false,
            speed_factor: 1.0,
            inter_sentence_pause_seconds: 0.1,
            output_path: Some(PathBuf::from("output.wav")),
            cleaner: CleanerKind::English,
            use_phonemes: true,
            language: "en_us".to_string(),
            device: Device::Cpu,
            player: None,
        }
    }
}

impl Config {
    /// Read a JSON config file.  Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| TtsError::Load {
            what: "config",
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        let config: Config = serde_json::from_slice(&bytes).map_err(|e| TtsError::Load {
            what: "config",
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.speed_factor.is_finite() || self.speed_factor <= 0.0 {
            return Err(TtsError::InvalidConfig(format!(
                "speed_factor must be a positive number, got {}",
                self.speed_factor
            )));
        }
        if !self.inter_sentence_pause_seconds.is_finite() || self.inter_sentence_pause_seconds < 0.0 {
            return Err(TtsError::InvalidConfig(format!(
                "inter_sentence_pause_seconds must be >= 0, got {}",
                self.inter_sentence_pause_seconds
            )));
        }
        if self.use_phonemes && self.language.trim().is_empty() {
            return Err(TtsError::InvalidConfig("language must be set when phonemising".into()));
        }
        Ok(())
    }

    /// The pause, rounded to whole microseconds.
    pub fn inter_sentence_pause(&self) -> Duration {
        Duration::from_micros((self.inter_sentence_pause_seconds * 1e6).round() as u64)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::new(&self.models_directory, self.use_alternate_embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_layout() {
        let paths = ModelPaths::new(Path::new("models"), false);
        assert_eq!(paths.embedding, Path::new("models/emb/glados_p2.pt"));
        assert_eq!(paths.mel_model, Path::new("models/glados-new.pt"));
        assert_eq!(paths.vocoder, Path::new("models/vocoder-gpu.pt"));
        assert_eq!(paths.phonemizer, Path::new("models/en_us_cmudict_ipa_forward.pt"));

        let alt = ModelPaths::new(Path::new("m"), true);
        assert_eq!(alt.embedding, Path::new("m/emb/glados_p1.pt"));
    }

    #[test]
    fn test_missing_artifact_names_path() {
        let dir = std::env::temp_dir().join(format!("glados-tts-missing-{}", std::process::id()));
        let paths = ModelPaths::new(&dir, false);
        let err = paths.require(false).unwrap_err();
        match err {
            TtsError::ModelNotFound(p) => assert_eq!(p, dir.join("emb").join("glados_p2.pt")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.speed_factor, 1.0);
        assert_eq!(cfg.inter_sentence_pause(), Duration::from_millis(100));
        assert_eq!(cfg.cleaner, CleanerKind::English);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_pause_has_no_float_residue() {
        let cfg: Config = serde_json::from_str(r#"{ "inter_sentence_pause_seconds": 0.3 }"#).unwrap();
        assert_eq!(cfg.inter_sentence_pause(), Duration::from_millis(300));
        let cfg = Config { inter_sentence_pause_seconds: 0.0125, ..Config::default() };
        assert_eq!(cfg.inter_sentence_pause(), Duration::from_micros(12_500));
    }

    #[test]
    fn test_partial_json() {
        let cfg: Config = serde_json::from_str(
            r#"{ "models_directory": "/opt/models", "speed_factor": 1.25, "cleaner": "identity", "device": "cuda" }"#,
        )
        .unwrap();
        assert_eq!(cfg.models_directory, PathBuf::from("/opt/models"));
        assert_eq!(cfg.speed_factor, 1.25);
        assert_eq!(cfg.cleaner, CleanerKind::Identity);
        assert_eq!(cfg.device, Device::Cuda);
        assert!(cfg.use_phonemes);
    }

    #[test]
    fn test_unknown_cleaner_rejected() {
        let err = serde_json::from_str::<Config>(r#"{ "cleaner": "german_cleaners" }"#).unwrap_err();
        assert!(err.to_string().contains("german_cleaners"), "got: {err}");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = Config { speed_factor: 0.0, ..Config::default() };
        assert!(cfg.validate().unwrap_err().is_fatal());
        let cfg = Config { inter_sentence_pause_seconds: -0.5, ..Config::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Cuda);
        assert!("tpu".parse::<Device>().is_err());
    }
}
