//! The model's input alphabet.
//!
//! The symbol order is part of the model: index `i` in the embedding table
//! was trained on `symbols[i]`, so the ordering below must never change.
//! Every entry is a single Unicode scalar value, including the combining
//! diacritics at the end.

use std::collections::HashSet;

use crate::error::{Result, TtsError};

/// Padding symbol, always index 0.
pub const PAD: char = '_';

/// Punctuation kept by the cleaner.  Together with [`PAD`] these are the
/// silent symbols.
pub const PUNCTUATION: &str = "!'(),.:;? ";

const SPECIAL: &str = "-";

const VOWELS: &str = "iyɨʉɯuɪʏʊeøɘəɵɤoɛœɜɞʌɔæɐaɶɑɒᵻ";
const NON_PULMONIC_CONSONANTS: &str = "ʘɓǀɗǃʄǂɠǁʛ";
const PULMONIC_CONSONANTS: &str =
    "pbtdʈɖcɟkɡqɢʔɴŋɲɳnɱmʙrʀⱱɾɽɸβfvθðszʃʒʂʐçʝxɣχʁħʕhɦɬɮʋɹɻjɰlɭʎʟ";
const SUPRASEGMENTALS: &str = "ˈˌːˑ";
const OTHER_SYMBOLS: &str = "ʍwɥʜʢʡɕʑɺɧ";
const DIACRITICS: &str = "ɚ˞ɫ";

/// Extra phonemes seen in IPA dictionary annotations.
const EXTRA_PHONEMES: [char; 8] = [
    'g', 'ɝ', '\u{0303}', '\u{030D}', '\u{0325}', '\u{0329}', '\u{032F}', '\u{0361}',
];

/// Ordered, immutable symbol catalog.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: Vec<char>,
    members: HashSet<char>,
    silent: Vec<i64>,
}

impl Vocabulary {
    /// Build a vocabulary from `pad`, the silent punctuation, then the
    /// remaining symbols in order.
    ///
    /// Fails if any symbol appears twice, since the index mapping would no
    /// longer be a bijection.
    pub fn new(pad: char, punctuation: &str, rest: impl IntoIterator<Item = char>) -> Result<Self> {
        let symbols: Vec<char> = std::iter::once(pad)
            .chain(punctuation.chars())
            .chain(rest)
            .collect();

        let mut members = HashSet::with_capacity(symbols.len());
        for &s in &symbols {
            if !members.insert(s) {
                return Err(TtsError::InvalidConfig(format!(
                    "duplicate vocabulary symbol {:?} (U+{:04X})",
                    s, s as u32
                )));
            }
        }

        let silent = (0..=punctuation.chars().count() as i64).collect();
        Ok(Self { symbols, members, silent })
    }

    /// The English IPA vocabulary the pretrained models were trained on.
    pub fn english() -> Self {
        let rest = SPECIAL
            .chars()
            .chain(VOWELS.chars())
            .chain(NON_PULMONIC_CONSONANTS.chars())
            .chain(PULMONIC_CONSONANTS.chars())
            .chain(SUPRASEGMENTALS.chars())
            .chain(OTHER_SYMBOLS.chars())
            .chain(DIACRITICS.chars())
            .chain(EXTRA_PHONEMES);
        Self::new(PAD, PUNCTUATION, rest).expect("built-in phoneme set has no duplicates")
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in index order.
    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    pub fn contains(&self, symbol: char) -> bool {
        self.members.contains(&symbol)
    }

    /// Indices of the pad symbol and punctuation, for downstream masking.
    pub fn silent_ids(&self) -> &[i64] {
        &self.silent
    }

    pub fn is_silent(&self, id: i64) -> bool {
        self.silent.binary_search(&id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_is_zero() {
        let vocab = Vocabulary::english();
        assert_eq!(vocab.symbols()[0], PAD);
        assert!(vocab.is_silent(0));
    }

    #[test]
    fn test_english_size_and_membership() {
        let vocab = Vocabulary::english();
        assert!(!vocab.is_empty());
        for ch in "həloʊ wɜːld!".chars() {
            assert!(vocab.contains(ch), "char {:?} not in vocab", ch);
        }
        assert!(!vocab.contains('中'));
        assert!(!vocab.contains('A'));
    }

    #[test]
    fn test_silent_ids_are_pad_and_punctuation() {
        let vocab = Vocabulary::english();
        let silent: String = vocab
            .silent_ids()
            .iter()
            .map(|&i| vocab.symbols()[i as usize])
            .collect();
        assert_eq!(silent, format!("{PAD}{PUNCTUATION}"));
        // '-' is the first non-silent symbol
        assert!(!vocab.is_silent(silent.chars().count() as i64));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = Vocabulary::new('_', "!.", "ab!".chars()).unwrap_err();
        assert!(err.to_string().contains("duplicate"), "got: {err}");
    }
}
