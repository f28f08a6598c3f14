//! # glados-tts
//!
//! Text-to-speech front end for the GLaDOS voice: text normalisation,
//! phonemisation, tokenisation and sentence-paced playback around an
//! external mel-spectrogram model and vocoder.
//!
//! ## Quick start
//!
//! ```no_run
//! # #[cfg(feature = "onnx")]
//! # fn main() -> glados_tts::Result<()> {
//! use glados_tts::{Config, GladosTts, OnnxLoader, PlayerSink};
//!
//! let config = Config::from_file(std::path::Path::new("glados.json"))?;
//! let mut tts = GladosTts::load(&config, &OnnxLoader)?;
//!
//! // Plays sentence by sentence, then writes config.output_path.
//! let mut sink = PlayerSink::default_for_platform();
//! let report = tts.speak("Hello, and again, welcome. The test begins now.", &mut sink)?;
//! println!("{} sentences, {:?}", report.segments.len(), report.elapsed);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "onnx"))]
//! # fn main() {}
//! ```
//!
//! The text side needs no models at all:
//!
//! ```
//! use glados_tts::numbers::normalize_numbers;
//! use glados_tts::cleaners::expand_abbreviations;
//!
//! assert_eq!(normalize_numbers("$4.50"), "four dollars, fifty cents");
//! assert_eq!(expand_abbreviations("Dr. Smith"), "doctor Smith");
//! ```
//!
//! ## Pipeline
//! 1. **Cleaning** — ASCII transliteration, numbers and currency, then
//!    abbreviations → spoken words.
//! 2. **Phonemisation** — the G2P converts text to IPA; symbols outside the
//!    vocabulary are dropped.
//! 3. **Tokenisation** — one ID per symbol; a terminal `.` is enforced.
//! 4. **Mel model** — `(tokens, speaker embedding, speed)` → mel spectrogram.
//! 5. **Vocoder** — mel → waveform, scaled to 16-bit PCM at 22 050 Hz.
//! 6. **Pacing** — sentence *i+1* is synthesized while sentence *i* plays,
//!    with a short pause between sentences.
//!
//! ## Features
//! | Feature  | Adds                                                      |
//! |----------|-----------------------------------------------------------|
//! | `onnx`   | [`OnnxLoader`]: ONNX Runtime mel model and vocoder        |
//! | `espeak` | `EspeakPhonemizer` via libespeak-ng (linked by build.rs)  |
//! | `cli`    | the interactive `glados-tts` binary                       |

pub mod audio;
pub mod cleaners;
pub mod config;
pub mod embedding;
pub mod error;
pub mod model;
pub mod numbers;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pacing;
pub mod phonemize;
pub mod playback;
pub mod prepare;
pub mod symbols;
pub mod tokenize;
pub mod tts;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use audio::{AudioSegment, SAMPLE_RATE};
pub use cleaners::{Cleaner, CleanerConfig, CleanerKind};
pub use config::{Config, Device, ModelPaths, PlayerConfig};
pub use embedding::SpeakerEmbedding;
pub use error::{ErrorKind, Result, TtsError};
pub use model::{Mel, MelModel, ModelLoader, Vocoder};
#[cfg(feature = "onnx")]
pub use onnx::OnnxLoader;
pub use pacing::{
    split_sentences, Clock, FallBehind, LogObserver, Pacer, PacerState, PacingObserver,
    PacingReport, SegmentReport, SentenceSynthesizer, SystemClock,
};
pub use phonemize::Phonemizer;
pub use playback::{check_player, AudioSink, NullSink, PlayerSink};
pub use prepare::{TextPreparer, TokenTensor};
pub use symbols::Vocabulary;
pub use tokenize::Tokenizer;
pub use tts::{GladosTts, Synthesizer};
