//! Sentence pacing.
//!
//! An utterance is split into sentences.  Sentence 0 is synthesized up
//! front; from then on, while sentence *i* plays, sentence *i+1* is
//! synthesized on a scoped background thread.  When it is ready the engine
//! sleeps out whatever remains of sentence *i* and starts *i+1*.  If
//! synthesis took longer than playback there is nothing to sleep; the
//! engine records a [`FallBehind`] and carries on.
//!
//! ```text
//! Idle ─▶ SynthesizingFirst ─▶ PlayingAndSynthesizingNext ─▶ Draining ─▶ Idle
//!                                   ▲                  │
//!                                   └──────────────────┘
//! ```
//!
//! A configurable silence is appended to every sentence except the last,
//! so it is both played and part of the exported waveform.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::anyhow;
use fancy_regex::Regex;
use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::audio::AudioSegment;
use crate::cleaners::is_abbreviation;
use crate::error::{Result, TtsError};
use crate::playback::AudioSink;

// ─────────────────────────────────────────────────────────────────────────────
// Sentence splitting
// ─────────────────────────────────────────────────────────────────────────────

/// Whitespace that follows sentence-final punctuation.  The punctuation
/// stays with its sentence; `3.14` is not a boundary.
static RE_SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?<=[.!?])\s+").unwrap());

/// `true` when the word before `end` is an abbreviation such as `Dr.`,
/// whose period does not end the sentence.
fn ends_with_abbreviation(text: &str, end: usize) -> bool {
    let word = text[..end]
        .rsplit(|c: char| c.is_whitespace() || c == '(' || c == '"')
        .next()
        .unwrap_or_default();
    word.strip_suffix('.').is_some_and(is_abbreviation)
}

/// Split `text` into trimmed, non-empty sentences in input order.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for m in RE_SENTENCE_BREAK.find_iter(text).flatten() {
        if ends_with_abbreviation(text, m.start()) {
            continue;
        }
        sentences.push(&text[last..m.start()]);
        last = m.end();
    }
    sentences.push(&text[last..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Turns one sentence into audio.  Called from a background thread while
/// the previous sentence plays, hence `Sync`.
pub trait SentenceSynthesizer: Sync {
    fn synthesize(&self, sentence: &str) -> Result<AudioSegment>;
}

impl<T: SentenceSynthesizer + ?Sized> SentenceSynthesizer for &T {
    fn synthesize(&self, sentence: &str) -> Result<AudioSegment> {
        (**self).synthesize(sentence)
    }
}

/// Monotonic time source.  Tests substitute a manual clock so pacing runs
/// without real sleeps.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacerState {
    #[default]
    Idle,
    SynthesizingFirst,
    PlayingAndSynthesizingNext,
    Draining,
}

/// Synthesis of sentence `index` finished after its predecessor had
/// already played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallBehind {
    pub index: usize,
    /// How far past the end of the previous sentence synthesis ran.
    pub lag: Duration,
}

/// Receives pacing events.  Every method defaults to doing nothing.
pub trait PacingObserver {
    fn state_changed(&mut self, _state: PacerState) {}

    fn sentence_synthesized(&mut self, _index: usize, _sentence: &str, _elapsed: Duration) {}

    fn segment_started(&mut self, _index: usize, _duration: Duration) {}

    fn fell_behind(&mut self, _event: &FallBehind) {}
}

/// Forwards pacing events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver {
    pub verbose_timing: bool,
}

impl LogObserver {
    pub fn new(verbose_timing: bool) -> Self {
        Self { verbose_timing }
    }
}

impl PacingObserver for LogObserver {
    fn state_changed(&mut self, state: PacerState) {
        debug!("pacer: {:?}", state);
    }

    fn sentence_synthesized(&mut self, index: usize, sentence: &str, elapsed: Duration) {
        if self.verbose_timing {
            info!("sentence {} synthesized in {:.1} ms: {:?}", index, elapsed.as_secs_f64() * 1e3, sentence);
        }
    }

    fn segment_started(&mut self, index: usize, duration: Duration) {
        if self.verbose_timing {
            info!("playing sentence {} ({:.2} s)", index, duration.as_secs_f64());
        }
    }

    fn fell_behind(&mut self, event: &FallBehind) {
        warn!(
            "synthesis fell behind playback by {:.1} ms before sentence {}",
            event.lag.as_secs_f64() * 1e3,
            event.index
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReport {
    pub index: usize,
    pub sentence: String,
    /// Played length, including any trailing pause.
    pub duration: Duration,
    pub synthesis_time: Duration,
    /// Start of playback relative to the start of the run.
    pub offset: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacingReport {
    pub segments: Vec<SegmentReport>,
    pub fall_behind: Vec<FallBehind>,
    pub elapsed: Duration,
    /// Everything that was played, pauses included.
    pub audio: AudioSegment,
    /// `false` when the run was cancelled part-way.
    pub completed: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pacer
// ─────────────────────────────────────────────────────────────────────────────

pub struct Pacer<C: Clock = SystemClock, O: PacingObserver = LogObserver> {
    pause: Duration,
    clock: C,
    observer: O,
    cancel: Arc<AtomicBool>,
    state: PacerState,
}

impl Pacer {
    pub fn new(pause: Duration, verbose_timing: bool) -> Self {
        Self::with_parts(pause, SystemClock, LogObserver::new(verbose_timing))
    }
}

impl<C: Clock, O: PacingObserver> Pacer<C, O> {
    pub fn with_parts(pause: Duration, clock: C, observer: O) -> Self {
        Self {
            pause,
            clock,
            observer,
            cancel: Arc::new(AtomicBool::new(false)),
            state: PacerState::Idle,
        }
    }

    /// Flag that, once set, stops the current run at the next sentence
    /// boundary.  Cleared when a run ends, so a request made just before
    /// `run` is called still stops that run.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    fn set_state(&mut self, state: PacerState) {
        self.state = state;
        self.observer.state_changed(state);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Synthesize and play `text` sentence by sentence.
    ///
    /// The first error from the synthesizer or the sink ends the run; the
    /// pacer is back in [`PacerState::Idle`] either way.
    pub fn run<S, K>(&mut self, text: &str, synth: &S, sink: &mut K) -> Result<PacingReport>
    where
        S: SentenceSynthesizer + ?Sized,
        K: AudioSink + ?Sized,
    {
        let result = self.run_inner(text, synth, sink);
        if result.is_err() {
            sink.stop();
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.set_state(PacerState::Idle);
        result
    }

    fn run_inner<S, K>(&mut self, text: &str, synth: &S, sink: &mut K) -> Result<PacingReport>
    where
        S: SentenceSynthesizer + ?Sized,
        K: AudioSink + ?Sized,
    {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let last = sentences.len() - 1;
        let pause = AudioSegment::silence(self.pause);

        let mut report = PacingReport {
            segments: Vec::with_capacity(sentences.len()),
            fall_behind: Vec::new(),
            elapsed: Duration::ZERO,
            audio: AudioSegment::empty(),
            completed: false,
        };

        if self.cancelled() {
            info!("utterance cancelled before it started");
            return Ok(report);
        }

        let run_start = self.clock.now();
        self.set_state(PacerState::SynthesizingFirst);
        let mut current = synth.synthesize(&sentences[0])?;
        let mut synthesis_time = self.clock.now().duration_since(run_start);
        self.observer.sentence_synthesized(0, &sentences[0], synthesis_time);

        for (index, sentence) in sentences.iter().enumerate() {
            if self.cancelled() {
                info!("utterance cancelled before sentence {}", index);
                sink.stop();
                report.elapsed = self.clock.now().duration_since(run_start);
                return Ok(report);
            }

            if index < last {
                current.append(&pause);
            }
            let duration = current.duration();

            sink.play(&current).map_err(TtsError::Playback)?;
            let started = self.clock.now();
            self.observer.segment_started(index, duration);
            report.segments.push(SegmentReport {
                index,
                sentence: sentence.clone(),
                duration,
                synthesis_time,
                offset: started.duration_since(run_start),
            });
            report.audio.append(&current);

            if index == last {
                self.set_state(PacerState::Draining);
                self.wait_out(started, duration);
                break;
            }

            if index == 0 {
                self.set_state(PacerState::PlayingAndSynthesizingNext);
            }
            let next_sentence = &sentences[index + 1];
            let synth_start = self.clock.now();
            let next = std::thread::scope(|s| {
                s.spawn(|| synth.synthesize(next_sentence))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(TtsError::Synthesis {
                            sentence: next_sentence.clone(),
                            source: anyhow!("synthesis thread panicked"),
                        })
                    })
            })?;
            synthesis_time = self.clock.now().duration_since(synth_start);
            self.observer.sentence_synthesized(index + 1, next_sentence, synthesis_time);

            let played = self.clock.now().duration_since(started);
            match duration.checked_sub(played) {
                Some(remaining) => {
                    if !remaining.is_zero() {
                        self.clock.sleep(remaining);
                    }
                }
                None => {
                    let event = FallBehind { index: index + 1, lag: played - duration };
                    self.observer.fell_behind(&event);
                    report.fall_behind.push(event);
                }
            }

            current = next;
        }

        report.completed = !self.cancelled();
        if !report.completed {
            sink.stop();
        }
        report.elapsed = self.clock.now().duration_since(run_start);
        Ok(report)
    }

    fn wait_out(&self, started: Instant, duration: Duration) {
        let played = self.clock.now().duration_since(started);
        if let Some(remaining) = duration.checked_sub(played) {
            if !remaining.is_zero() {
                self.clock.sleep(remaining);
            }
        }
    }
}
