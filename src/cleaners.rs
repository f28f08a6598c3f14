//! Text cleaning — normalisation, optional phonemisation and vocabulary
//! filtering.
//!
//! The English pipeline is: ASCII transliteration → [`normalize_numbers`] →
//! [`expand_abbreviations`].  When phonemisation is enabled the result is
//! passed through the G2P and every symbol outside the vocabulary is dropped.
//! Whitespace is collapsed last in every mode.

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use deunicode::deunicode_char;
use serde::Deserialize;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::config::{require_file, Device, PHONEMIZER_CHECKPOINT};
use crate::error::{Result, TtsError};
use crate::model::ModelLoader;
use crate::numbers::normalize_numbers;
use crate::phonemize::Phonemizer;
use crate::symbols::Vocabulary;

// ─────────────────────────────────────────────────────────────────────────────
// Cleaner selection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum CleanerKind {
    /// Text passes through untouched (whitespace is still collapsed).
    Identity,
    /// Transliterate, expand numbers and abbreviations.
    English,
}

impl CleanerKind {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Self::Identity => text.to_string(),
            Self::English => english_cleaners(text),
        }
    }
}

impl FromStr for CleanerKind {
    type Err = TtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "english" | "english_cleaners" => Ok(Self::English),
            "identity" | "no_cleaners" => Ok(Self::Identity),
            other => Err(TtsError::UnsupportedCleaner(other.to_string())),
        }
    }
}

impl TryFrom<String> for CleanerKind {
    type Error = TtsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for CleanerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::English => "english",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalisation passes
// ─────────────────────────────────────────────────────────────────────────────

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// `mrs` precedes `mr` so the longer form wins.
const ABBREVIATION_TABLE: [(&str, &str); 18] = [
    ("mrs", "misses"),
    ("mr", "mister"),
    ("dr", "doctor"),
    ("st", "saint"),
    ("co", "company"),
    ("jr", "junior"),
    ("maj", "major"),
    ("gen", "general"),
    ("drs", "doctors"),
    ("rev", "reverend"),
    ("lt", "lieutenant"),
    ("hon", "honorable"),
    ("sgt", "sergeant"),
    ("capt", "captain"),
    ("esq", "esquire"),
    ("ltd", "limited"),
    ("col", "colonel"),
    ("ft", "fort"),
];

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    ABBREVIATION_TABLE
        .iter()
        .map(|&(abbrev, full)| (Regex::new(&format!(r"(?i)\b{}\.", abbrev)).unwrap(), full))
        .collect()
});

/// `true` if `word` (without its period) is one of the expanded
/// abbreviations, compared case-insensitively.
pub fn is_abbreviation(word: &str) -> bool {
    ABBREVIATION_TABLE
        .iter()
        .any(|(abbrev, _)| abbrev.eq_ignore_ascii_case(word))
}

/// Expand the fixed abbreviation table, case-insensitively, only where the
/// abbreviation is followed by a period.
pub fn expand_abbreviations(text: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(text.to_string(), |acc, (re, full)| re.replace_all(&acc, *full).into_owned())
}

pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Reduce `text` to ASCII: strip diacritics, map typographic punctuation to
/// its plain form and transliterate the rest (`€` → `EUR`, Han characters
/// to pinyin).  `£` survives so the number pass can read pound amounts.
pub fn transliterate_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            c if c.is_ascii() => out.push(c),
            '£' => out.push(c),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '«' | '»' => out.push('"'),
            '\u{2010}'..='\u{2015}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' | '\u{2000}'..='\u{200A}' => out.push(' '),
            'ß' => out.push_str("ss"),
            'æ' => out.push_str("ae"),
            'Æ' => out.push_str("AE"),
            'ø' => out.push('o'),
            'Ø' => out.push('O'),
            'œ' => out.push_str("oe"),
            'Œ' => out.push_str("OE"),
            _ => {
                let before = out.len();
                out.extend(
                    std::iter::once(c)
                        .nfkd()
                        .filter(|d| d.is_ascii() && !is_combining_mark(*d)),
                );
                if out.len() == before && !is_combining_mark(c) {
                    out.push_str(deunicode_char(c).unwrap_or_default());
                }
            }
        }
    }
    out
}

/// Transliterate, expand numbers, expand abbreviations.
pub fn english_cleaners(text: &str) -> String {
    let text = transliterate_ascii(text);
    let text = normalize_numbers(&text);
    expand_abbreviations(&text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Cleaner
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable cleaning configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanerConfig {
    pub kind: CleanerKind,
    pub use_phonemes: bool,
    pub language: String,
    pub device: Device,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            kind: CleanerKind::English,
            use_phonemes: true,
            language: "en_us".to_string(),
            device: Device::Cpu,
        }
    }
}

pub struct Cleaner {
    kind: CleanerKind,
    language: String,
    phonemizer: Option<Box<dyn Phonemizer>>,
    vocab: Arc<Vocabulary>,
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner")
            .field("kind", &self.kind)
            .field("language", &self.language)
            .field("phonemize", &self.phonemizer.is_some())
            .finish()
    }
}

impl Cleaner {
    /// A cleaner that never phonemises.
    pub fn new(kind: CleanerKind, vocab: Arc<Vocabulary>) -> Self {
        Self { kind, language: String::new(), phonemizer: None, vocab }
    }

    /// A phonemising cleaner around an already-loaded G2P.
    pub fn with_phonemizer(
        kind: CleanerKind,
        language: &str,
        phonemizer: Box<dyn Phonemizer>,
        vocab: Arc<Vocabulary>,
    ) -> Self {
        Self {
            kind,
            language: language.to_string(),
            phonemizer: Some(phonemizer),
            vocab,
        }
    }

    /// Build from `config`, loading the G2P checkpoint from `models_dir`
    /// when phonemisation is enabled.
    pub fn load(
        config: &CleanerConfig,
        models_dir: &Path,
        vocab: Arc<Vocabulary>,
        loader: &dyn ModelLoader,
    ) -> Result<Self> {
        if !config.use_phonemes {
            return Ok(Self::new(config.kind, vocab));
        }

        let checkpoint = models_dir.join(PHONEMIZER_CHECKPOINT);
        require_file(&checkpoint)?;
        debug!("loading phonemizer from {}", checkpoint.display());
        let phonemizer = loader
            .load_phonemizer(&checkpoint, &config.language, config.device)
            .map_err(|source| TtsError::Load { what: "phonemizer", path: checkpoint.clone(), source })?;

        Ok(Self::with_phonemizer(config.kind, &config.language, phonemizer, vocab))
    }

    pub fn kind(&self) -> CleanerKind {
        self.kind
    }

    pub fn phonemizes(&self) -> bool {
        self.phonemizer.is_some()
    }

    /// Clean (and optionally phonemise) `text`.  Only the phonemiser can fail.
    pub fn clean(&self, text: &str) -> Result<String> {
        let mut text = self.kind.apply(text);

        if let Some(phonemizer) = &self.phonemizer {
            let phonemes = phonemizer
                .phonemize(&text, &self.language)
                .map_err(TtsError::Phonemize)?;
            text = phonemes.chars().filter(|&c| self.vocab.contains(c)).collect();
        }

        Ok(collapse_whitespace(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::{MelModel, Vocoder};

    /// Lowercases its input and tags it with the language.
    struct EchoPhonemizer;

    impl Phonemizer for EchoPhonemizer {
        fn phonemize(&self, text: &str, language: &str) -> anyhow::Result<String> {
            Ok(format!("{} [{}] ʃ中", text.to_lowercase(), language))
        }
    }

    struct FailingPhonemizer;

    impl Phonemizer for FailingPhonemizer {
        fn phonemize(&self, _text: &str, _language: &str) -> anyhow::Result<String> {
            anyhow::bail!("g2p exploded")
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        phonemizer_loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load_mel_model(&self, _: &Path, _: Device) -> anyhow::Result<Box<dyn MelModel>> {
            anyhow::bail!("not used")
        }

        fn load_vocoder(&self, _: &Path, _: Device) -> anyhow::Result<Box<dyn Vocoder>> {
            anyhow::bail!("not used")
        }

        fn load_phonemizer(&self, _: &Path, _: &str, _: Device) -> anyhow::Result<Box<dyn Phonemizer>> {
            self.phonemizer_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoPhonemizer))
        }
    }

    fn vocab() -> Arc<Vocabulary> {
        Arc::new(Vocabulary::english())
    }

    #[test]
    fn test_abbreviations() {
        assert_eq!(expand_abbreviations("Dr. Smith"), "doctor Smith");
        assert_eq!(expand_abbreviations("MRS. Jones and mr. Jones"), "misses Jones and mister Jones");
        assert_eq!(expand_abbreviations("Capt. Ltd. Ft. Col."), "captain limited fort colonel");
        // No trailing period, no expansion.
        assert_eq!(expand_abbreviations("Dr Smith"), "Dr Smith");
        // Whole abbreviation only.
        assert_eq!(expand_abbreviations("Sadr. x"), "Sadr. x");
    }

    #[test]
    fn test_is_abbreviation() {
        assert!(is_abbreviation("Dr"));
        assert!(is_abbreviation("MRS"));
        assert!(!is_abbreviation("Dr."));
        assert!(!is_abbreviation("cats"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \t b\n\nc  "), "a b c");
    }

    #[test]
    fn test_transliterate_ascii() {
        assert_eq!(transliterate_ascii("café naïve"), "cafe naive");
        assert_eq!(transliterate_ascii("\u{201C}Hi\u{201D} \u{2014} it\u{2019}s"), "\"Hi\" - it's");
        assert_eq!(transliterate_ascii("£5 Straße"), "£5 Strasse");
    }

    #[test]
    fn test_transliterate_beyond_decomposition() {
        assert_eq!(transliterate_ascii("€5"), "EUR5");
        let han = transliterate_ascii("北京");
        assert!(han.is_ascii() && !han.trim().is_empty(), "got: {han:?}");
    }

    #[test]
    fn test_english_cleaners() {
        assert_eq!(english_cleaners("Dr. Smith has 3 cats."), "doctor Smith has three cats.");
        assert_eq!(english_cleaners("It costs £2."), "It costs two pounds.");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("english_cleaners".parse::<CleanerKind>().unwrap(), CleanerKind::English);
        assert_eq!("no_cleaners".parse::<CleanerKind>().unwrap(), CleanerKind::Identity);
        let err = "klingon".parse::<CleanerKind>().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn test_identity_cleaner_only_collapses() {
        let cleaner = Cleaner::new(CleanerKind::Identity, vocab());
        assert_eq!(cleaner.clean("  Dr.  4 \n").unwrap(), "Dr. 4");
    }

    #[test]
    fn test_phonemes_filtered_against_vocabulary() {
        let cleaner = Cleaner::with_phonemizer(CleanerKind::English, "en_us", Box::new(EchoPhonemizer), vocab());
        // '[', ']' and '中' are dropped.
        let out = cleaner.clean("Hi  there").unwrap();
        assert_eq!(out, "hi there en_us ʃ");
    }

    #[test]
    fn test_phonemizer_failure_propagates() {
        let cleaner = Cleaner::with_phonemizer(CleanerKind::English, "en_us", Box::new(FailingPhonemizer), vocab());
        let err = cleaner.clean("Hello").unwrap_err();
        assert!(matches!(err, TtsError::Phonemize(_)));
    }

    #[test]
    fn test_load_requires_checkpoint() {
        let dir = std::env::temp_dir().join(format!("glados-tts-no-g2p-{}", std::process::id()));
        let loader = CountingLoader::default();
        let err = Cleaner::load(&CleanerConfig::default(), &dir, vocab(), &loader).unwrap_err();
        match err {
            TtsError::ModelNotFound(p) => assert_eq!(p, dir.join(PHONEMIZER_CHECKPOINT)),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(loader.phonemizer_loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_without_phonemes_skips_checkpoint() {
        let config = CleanerConfig { use_phonemes: false, ..CleanerConfig::default() };
        let loader = CountingLoader::default();
        let cleaner = Cleaner::load(&config, &PathBuf::from("/nonexistent"), vocab(), &loader).unwrap();
        assert!(!cleaner.phonemizes());
        assert_eq!(cleaner.clean("Dr. Who").unwrap(), "doctor Who");
    }

    #[test]
    fn test_load_with_checkpoint() {
        let dir = std::env::temp_dir().join(format!("glados-tts-g2p-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PHONEMIZER_CHECKPOINT), b"checkpoint").unwrap();
        let loader = CountingLoader::default();
        let cleaner = Cleaner::load(&CleanerConfig::default(), &dir, vocab(), &loader).unwrap();
        assert!(cleaner.phonemizes());
        assert_eq!(loader.phonemizer_loads.load(Ordering::SeqCst), 1);
        std::fs::remove_dir_all(dir).ok();
    }
}
