//! Character-level tokeniser.
//!
//! Maps each Unicode character of a cleaned (usually phonemised) string to
//! its index in the [`Vocabulary`], and back.  Unknown characters and unknown
//! IDs are silently skipped in both directions.

use std::collections::HashMap;

use crate::symbols::Vocabulary;

/// Bidirectional symbol ↔ ID table, built once from a vocabulary.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    symbol_to_id: HashMap<char, i64>,
    id_to_symbol: Vec<char>,
}

impl Tokenizer {
    pub fn new(vocab: &Vocabulary) -> Self {
        let id_to_symbol = vocab.symbols().to_vec();
        let symbol_to_id = id_to_symbol
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as i64))
            .collect();
        Self { symbol_to_id, id_to_symbol }
    }

    /// Map a character to its vocabulary index, returning `None` for unknowns.
    pub fn char_to_id(&self, c: char) -> Option<i64> {
        self.symbol_to_id.get(&c).copied()
    }

    pub fn id_to_char(&self, id: i64) -> Option<char> {
        usize::try_from(id).ok().and_then(|i| self.id_to_symbol.get(i)).copied()
    }

    /// Convert text to token IDs.  Never fails.
    pub fn encode(&self, text: &str) -> Vec<i64> {
        text.chars().filter_map(|c| self.char_to_id(c)).collect()
    }

    /// Convert token IDs back to text.  Never fails.
    pub fn decode(&self, ids: &[i64]) -> String {
        ids.iter().filter_map(|&id| self.id_to_char(id)).collect()
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_symbol.len()
    }
}
