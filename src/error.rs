//! Error taxonomy for the whole pipeline.
//!
//! External collaborators (model backends, phonemisers, playback sinks)
//! report failures as [`anyhow::Error`]; the pipeline wraps them into the
//! variant that tells the caller what to do next.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`TtsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at construction; the process should not proceed.
    Configuration,
    /// Rejected per call; the caller may retry with valid input.
    Input,
    /// An external model, phonemiser or sink failed for one utterance.
    Synthesis,
    /// Writing an output artifact failed.
    Output,
}

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("model not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("cleaner not supported: {0:?}; currently supported: [\"english\", \"identity\"]")]
    UnsupportedCleaner(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load {what} from {}", path.display())]
    Load {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("input text is empty")]
    EmptyText,

    #[error("phonemisation failed")]
    Phonemize(#[source] anyhow::Error),

    #[error("synthesis failed for {sentence:?}")]
    Synthesis {
        sentence: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("audio playback failed")]
    Playback(#[source] anyhow::Error),

    #[error("cannot write {}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl TtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelNotFound(_)
            | Self::UnsupportedCleaner(_)
            | Self::InvalidConfig(_)
            | Self::Load { .. } => ErrorKind::Configuration,
            Self::EmptyText => ErrorKind::Input,
            Self::Phonemize(_) | Self::Synthesis { .. } | Self::Playback(_) => ErrorKind::Synthesis,
            Self::Output { .. } => ErrorKind::Output,
        }
    }

    /// `true` for errors that should abort startup rather than one utterance.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

pub type Result<T> = std::result::Result<T, TtsError>;
