//! The synthesis pipeline and the engine that speaks with it.
//!
//! [`Synthesizer`] turns one sentence into audio:
//!
//! ```text
//! prepare (clean → phonemize → tokenize) → mel model → vocoder → 16-bit PCM
//! ```
//!
//! [`GladosTts`] owns a synthesizer and a [`Pacer`], plays utterances through
//! an [`AudioSink`] and exports each completed utterance as a WAV file.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use log::{debug, info};

use crate::audio::AudioSegment;
use crate::cleaners::{Cleaner, CleanerConfig};
use crate::config::{Config, Device};
use crate::embedding::SpeakerEmbedding;
use crate::error::{Result, TtsError};
use crate::model::{MelModel, ModelLoader, Vocoder};
use crate::pacing::{
    split_sentences, Clock, LogObserver, Pacer, PacingObserver, PacingReport, SentenceSynthesizer,
    SystemClock,
};
use crate::playback::AudioSink;
use crate::prepare::TextPreparer;
use crate::symbols::Vocabulary;

/// Spoken once after loading so the first real request is not slowed down
/// by lazy initialisation inside the model runtime.
const WARM_UP_TEXT: &str = "Hello";

// ─────────────────────────────────────────────────────────────────────────────
// Synthesizer
// ─────────────────────────────────────────────────────────────────────────────

pub struct Synthesizer {
    preparer: TextPreparer,
    mel_model: Box<dyn MelModel>,
    vocoder: Box<dyn Vocoder>,
    embedding: SpeakerEmbedding,
    speed: f32,
    verbose_timing: bool,
}

impl Synthesizer {
    pub fn new(
        preparer: TextPreparer,
        mel_model: Box<dyn MelModel>,
        vocoder: Box<dyn Vocoder>,
        embedding: SpeakerEmbedding,
        speed: f32,
    ) -> Self {
        Self { preparer, mel_model, vocoder, embedding, speed, verbose_timing: false }
    }

    pub fn with_verbose_timing(mut self, verbose_timing: bool) -> Self {
        self.verbose_timing = verbose_timing;
        self
    }

    /// Load every artifact named by `config` and warm the models up.
    ///
    /// All artifact paths are checked before anything is loaded, so a
    /// missing file is reported without paying for the ones before it.
    pub fn load(config: &Config, loader: &dyn ModelLoader) -> Result<Self> {
        config.validate()?;
        let paths = config.model_paths();
        paths.require(config.use_phonemes)?;

        let device = config.device;
        let vocab = Arc::new(Vocabulary::english());
        let cleaner = Cleaner::load(
            &CleanerConfig {
                kind: config.cleaner,
                use_phonemes: config.use_phonemes,
                language: config.language.clone(),
                device,
            },
            &config.models_directory,
            vocab.clone(),
            loader,
        )?;

        let embedding = load_artifact("speaker embedding", &paths.embedding, |p| {
            loader.load_speaker_embedding(p, device)
        })?;
        let mel_model = load_artifact("mel model", &paths.mel_model, |p| loader.load_mel_model(p, device))?;
        let vocoder = load_artifact("vocoder", &paths.vocoder, |p| loader.load_vocoder(p, device))?;

        info!(
            "loaded models from {} (device {}, embedding dim {})",
            config.models_directory.display(),
            device,
            embedding.dim()
        );

        let synth = Self::new(
            TextPreparer::new(cleaner, &vocab, device),
            mel_model,
            vocoder,
            embedding,
            config.speed_factor,
        )
        .with_verbose_timing(config.verbose_timing);
        synth.warm_up()?;
        Ok(synth)
    }

    pub fn warm_up(&self) -> Result<()> {
        let t = Instant::now();
        self.synthesize(WARM_UP_TEXT)?;
        info!("warm-up done in {:.0} ms", t.elapsed().as_secs_f64() * 1e3);
        Ok(())
    }

    pub fn device(&self) -> Device {
        self.embedding.device()
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    fn timing(&self, stage: &str, since: Instant) {
        if self.verbose_timing {
            debug!("{stage}: {:.1} ms", since.elapsed().as_secs_f64() * 1e3);
        }
    }

    /// Synthesize one sentence.
    pub fn synthesize(&self, sentence: &str) -> Result<AudioSegment> {
        let wrap = |source| TtsError::Synthesis { sentence: sentence.to_string(), source };

        let t = Instant::now();
        let tokens = self.preparer.prepare(sentence)?;
        self.timing("phonemize+tokenize", t);

        let t = Instant::now();
        let mel = self
            .mel_model
            .generate(&tokens, &self.embedding, self.speed)
            .map_err(wrap)?;
        self.timing("mel", t);

        let t = Instant::now();
        let waveform = self.vocoder.vocode(&mel).map_err(wrap)?;
        self.timing("vocoder", t);

        Ok(AudioSegment::from_waveform(&waveform))
    }
}

impl SentenceSynthesizer for Synthesizer {
    fn synthesize(&self, sentence: &str) -> Result<AudioSegment> {
        Synthesizer::synthesize(self, sentence)
    }
}

fn load_artifact<T>(
    what: &'static str,
    path: &Path,
    load: impl FnOnce(&Path) -> anyhow::Result<T>,
) -> Result<T> {
    debug!("loading {what} from {}", path.display());
    load(path).map_err(|source| TtsError::Load { what, path: path.to_path_buf(), source })
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded voice, ready to speak.
pub struct GladosTts<C: Clock = SystemClock, O: PacingObserver = LogObserver> {
    synthesizer: Synthesizer,
    pacer: Pacer<C, O>,
    output_path: Option<PathBuf>,
}

impl GladosTts {
    /// Load from `config`; see [`Synthesizer::load`].
    pub fn load(config: &Config, loader: &dyn ModelLoader) -> Result<Self> {
        let synthesizer = Synthesizer::load(config, loader)?;
        let pacer = Pacer::new(config.inter_sentence_pause(), config.verbose_timing);
        Ok(Self::new(synthesizer, pacer, config.output_path.clone()))
    }
}

impl<C: Clock, O: PacingObserver> GladosTts<C, O> {
    pub fn new(synthesizer: Synthesizer, pacer: Pacer<C, O>, output_path: Option<PathBuf>) -> Self {
        Self { synthesizer, pacer, output_path }
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn pacer(&self) -> &Pacer<C, O> {
        &self.pacer
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Speak `text` through `sink`, sentence by sentence.
    ///
    /// When the utterance completes and an output path is configured, the
    /// whole waveform is written there.  A cancelled utterance writes
    /// nothing.
    pub fn speak<K: AudioSink + ?Sized>(&mut self, text: &str, sink: &mut K) -> Result<PacingReport> {
        let report = self.pacer.run(text, &self.synthesizer, sink)?;
        if report.completed {
            if let Some(path) = &self.output_path {
                report.audio.write_wav(path)?;
            }
        }
        Ok(report)
    }

    /// Synthesize all of `text` without playback or pacing, joined with the
    /// configured pause.
    pub fn render(&self, text: &str) -> Result<AudioSegment> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let pause = AudioSegment::silence(self.pacer.pause());
        let mut audio = AudioSegment::empty();
        for (i, sentence) in sentences.iter().enumerate() {
            if i > 0 {
                audio.append(&pause);
            }
            audio.append(&self.synthesizer.synthesize(sentence)?);
        }
        Ok(audio)
    }

    /// [`render`](Self::render) and write the result to the output path.
    pub fn render_to_file(&self, text: &str) -> Result<AudioSegment> {
        let audio = self.render(text)?;
        if let Some(path) = &self.output_path {
            audio.write_wav(path)?;
        }
        Ok(audio)
    }
}
