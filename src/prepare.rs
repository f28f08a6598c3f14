//! Text → token tensor.
//!
//! [`TextPreparer`] is the single entry point the synthesizer uses: it
//! enforces terminal punctuation, runs the cleaner, then the tokenizer, and
//! hands back a one-row tensor tagged with the configured device.

use std::sync::Arc;

use crate::cleaners::Cleaner;
use crate::config::Device;
use crate::error::{Result, TtsError};
use crate::symbols::Vocabulary;
use crate::tokenize::Tokenizer;

/// Token IDs laid out as a `[1, n]` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTensor {
    ids: Vec<i64>,
    device: Device,
}

impl TokenTensor {
    pub fn new(ids: Vec<i64>, device: Device) -> Self {
        Self { ids, device }
    }

    pub fn shape(&self) -> [usize; 2] {
        [1, self.ids.len()]
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<i64> {
        self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Append `.` unless `text` already ends in `.`, `?` or `!`.
pub fn ensure_terminal_punctuation(text: &str) -> String {
    match text.chars().last() {
        Some('.' | '?' | '!') => text.to_string(),
        _ => format!("{}.", text),
    }
}

#[derive(Debug)]
pub struct TextPreparer {
    cleaner: Cleaner,
    tokenizer: Tokenizer,
    device: Device,
}

impl TextPreparer {
    pub fn new(cleaner: Cleaner, vocab: &Arc<Vocabulary>, device: Device) -> Self {
        Self { cleaner, tokenizer: Tokenizer::new(vocab), device }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Clean and tokenize one utterance.
    ///
    /// Empty or whitespace-only text is rejected with [`TtsError::EmptyText`]
    /// before the cleaner or tokenizer sees it.
    pub fn prepare(&self, text: &str) -> Result<TokenTensor> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let text = ensure_terminal_punctuation(text);
        let cleaned = self.cleaner.clean(&text)?;
        Ok(TokenTensor::new(self.tokenizer.encode(&cleaned), self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cleaners::CleanerKind;
    use crate::phonemize::Phonemizer;

    /// Counts calls and returns its input unchanged.
    struct SpyPhonemizer(Arc<AtomicUsize>);

    impl Phonemizer for SpyPhonemizer {
        fn phonemize(&self, text: &str, _language: &str) -> anyhow::Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_string())
        }
    }

    fn preparer() -> TextPreparer {
        let vocab = Arc::new(Vocabulary::english());
        TextPreparer::new(Cleaner::new(CleanerKind::Identity, vocab.clone()), &vocab, Device::Cpu)
    }

    #[test]
    fn test_ensure_terminal_punctuation() {
        assert_eq!(ensure_terminal_punctuation("hello"), "hello.");
        assert_eq!(ensure_terminal_punctuation("hello."), "hello.");
        assert_eq!(ensure_terminal_punctuation("really?"), "really?");
        assert_eq!(ensure_terminal_punctuation("stop!"), "stop!");
        assert_eq!(ensure_terminal_punctuation("well,"), "well,.");
    }

    #[test]
    fn test_prepare_appends_one_period() {
        let p = preparer();
        let t = p.prepare("hi").unwrap();
        assert_eq!(p.tokenizer().decode(t.ids()), "hi.");
        assert_eq!(t.shape(), [1, 3]);
        assert_eq!(t.device(), Device::Cpu);

        let t = p.prepare("hi?").unwrap();
        assert_eq!(p.tokenizer().decode(t.ids()), "hi?");
    }

    #[test]
    fn test_empty_text_never_reaches_cleaner() {
        let calls = Arc::new(AtomicUsize::new(0));
        let vocab = Arc::new(Vocabulary::english());
        let cleaner = Cleaner::with_phonemizer(
            CleanerKind::English,
            "en_us",
            Box::new(SpyPhonemizer(calls.clone())),
            vocab.clone(),
        );
        let p = TextPreparer::new(cleaner, &vocab, Device::Mps);

        assert!(matches!(p.prepare(""), Err(TtsError::EmptyText)));
        assert!(matches!(p.prepare(" \n\t"), Err(TtsError::EmptyText)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let t = p.prepare("ok").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.device(), Device::Mps);
    }
}
