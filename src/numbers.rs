//! Number normalisation — digits, currency, decimals and ordinals to words.
//!
//! [`normalize_numbers`] applies the passes in a fixed order; each pass
//! assumes the previous ones have already run (e.g. currency expansion sees
//! `$1000.50`, never `$1,000.50`).  Malformed numeric substrings are passed
//! through or given a best-effort reading; nothing here fails.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

// ─────────────────────────────────────────────────────────────────────────────
// Number → words
// ─────────────────────────────────────────────────────────────────────────────

const ONES: &[&str] = &[
    "", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
    "ten", "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen",
    "seventeen", "eighteen", "nineteen",
];
const TENS: &[&str] = &["", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety"];
const SCALE: &[&str] = &["", "thousand", "million", "billion", "trillion", "quadrillion", "quintillion"];

fn three_digits_to_words(n: u64) -> String {
    let mut parts = Vec::new();
    let hundreds = n / 100;
    let remainder = n % 100;
    if hundreds > 0 {
        parts.push(format!("{} hundred", ONES[hundreds as usize]));
    }
    if remainder < 20 {
        if remainder > 0 {
            parts.push(ONES[remainder as usize].to_string());
        }
    } else {
        let tens_word = TENS[(remainder / 10) as usize];
        let ones_word = ONES[(remainder % 10) as usize];
        if ones_word.is_empty() {
            parts.push(tens_word.to_string());
        } else {
            parts.push(format!("{}-{}", tens_word, ones_word));
        }
    }
    parts.join(" ")
}

/// Convert a non-negative integer to English words.
///
/// Magnitude groups are separated by `", "` and never joined with "and":
/// `12345` → `"twelve thousand, three hundred forty-five"`.
pub fn number_to_words(n: u64) -> String {
    if n == 0 {
        return "zero".to_string();
    }
    let mut groups = Vec::new();
    let mut remaining = n;
    for &scale in SCALE {
        let chunk = remaining % 1000;
        if chunk > 0 {
            let words = three_digits_to_words(chunk);
            if scale.is_empty() {
                groups.push(words);
            } else {
                groups.push(format!("{} {}", words, scale));
            }
        }
        remaining /= 1000;
        if remaining == 0 {
            break;
        }
    }
    groups.reverse();
    groups.join(", ")
}

/// Read a digit string one digit at a time (`"42"` → `"four two"`).
pub fn digits_to_words(s: &str) -> String {
    s.chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| if d == 0 { "zero" } else { ONES[d as usize] })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cardinal words for a digit string, falling back to digit-by-digit reading
/// when the value does not fit in a `u64`.
fn digit_string_to_words(s: &str) -> String {
    match s.parse::<u64>() {
        Ok(n) => number_to_words(n),
        Err(_) => digits_to_words(s),
    }
}

/// Convert a non-negative integer to its ordinal form (`21` → `"twenty-first"`).
pub fn ordinal_to_words(n: u64) -> String {
    let word = number_to_words(n);
    const EXCEPTIONS: [(&str, &str); 10] = [
        ("one", "first"),
        ("two", "second"),
        ("three", "third"),
        ("four", "fourth"),
        ("five", "fifth"),
        ("six", "sixth"),
        ("seven", "seventh"),
        ("eight", "eighth"),
        ("nine", "ninth"),
        ("twelve", "twelfth"),
    ];

    // Only the final word changes: "twenty-one" → "twenty-first".
    let split = word.rfind(['-', ' ']).map(|p| p + 1).unwrap_or(0);
    let (prefix, last) = word.split_at(split);

    let last_ord = EXCEPTIONS
        .iter()
        .find(|(base, _)| *base == last)
        .map(|(_, ord)| (*ord).to_string())
        .unwrap_or_else(|| match last.strip_suffix('y') {
            Some(stem) => format!("{}ieth", stem),
            None => format!("{}th", last),
        });

    format!("{}{}", prefix, last_ord)
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiled regexes (lazily initialised once)
// ─────────────────────────────────────────────────────────────────────────────

static RE_COMMA_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9][0-9,]+[0-9])").unwrap());
static RE_POUNDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"£([0-9,]*[0-9]+)").unwrap());
static RE_DOLLARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([0-9.,]*[0-9]+)").unwrap());
static RE_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9]+\.[0-9]+)").unwrap());
static RE_ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([0-9]+)(st|nd|rd|th)\b").unwrap());
static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9]+\b").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Expansion passes
// ─────────────────────────────────────────────────────────────────────────────

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{} {}", n, unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

pub fn remove_commas(text: &str) -> String {
    RE_COMMA_NUMBER
        .replace_all(text, |caps: &Captures| caps[1].replace(',', ""))
        .into_owned()
}

pub fn expand_pounds(text: &str) -> String {
    RE_POUNDS
        .replace_all(text, |caps: &Captures| {
            let amount = caps[1].replace(',', "");
            match amount.parse::<u64>() {
                Ok(n) => plural(n, "pound"),
                Err(_) => format!("{} pounds", amount),
            }
        })
        .into_owned()
}

fn parse_amount_part(part: &str) -> Option<u64> {
    if part.is_empty() {
        Some(0)
    } else {
        part.parse().ok()
    }
}

pub fn expand_dollars(text: &str) -> String {
    RE_DOLLARS
        .replace_all(text, |caps: &Captures| {
            let raw = &caps[1];
            let amount = raw.replace(',', "");
            let parts: Vec<&str> = amount.split('.').collect();
            if parts.len() > 2 {
                return format!("{} dollars", raw);
            }

            let dollars = parse_amount_part(parts[0]);
            let cents = parse_amount_part(parts.get(1).copied().unwrap_or(""));
            let (Some(dollars), Some(cents)) = (dollars, cents) else {
                return format!("{} dollars", raw);
            };

            match (dollars, cents) {
                (0, 0) => "zero dollars".to_string(),
                (d, 0) => plural(d, "dollar"),
                (0, c) => plural(c, "cent"),
                (d, c) => format!("{}, {}", plural(d, "dollar"), plural(c, "cent")),
            }
        })
        .into_owned()
}

pub fn expand_decimal_point(text: &str) -> String {
    RE_DECIMAL
        .replace_all(text, |caps: &Captures| caps[1].replace('.', " point "))
        .into_owned()
}

pub fn expand_ordinals(text: &str) -> String {
    RE_ORDINAL
        .replace_all(text, |caps: &Captures| match caps[1].parse::<u64>() {
            Ok(n) => ordinal_to_words(n),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

pub fn expand_cardinals(text: &str) -> String {
    RE_NUMBER
        .replace_all(text, |caps: &Captures| digit_string_to_words(&caps[0]))
        .into_owned()
}

/// Rewrite every number in `text` into spoken words.
pub fn normalize_numbers(text: &str) -> String {
    let text = remove_commas(text);
    let text = expand_pounds(&text);
    let text = expand_dollars(&text);
    let text = expand_decimal_point(&text);
    let text = expand_ordinals(&text);
    expand_cardinals(&text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_words() {
        assert_eq!(number_to_words(0), "zero");
        assert_eq!(number_to_words(7), "seven");
        assert_eq!(number_to_words(12), "twelve");
        assert_eq!(number_to_words(40), "forty");
        assert_eq!(number_to_words(101), "one hundred one");
        assert_eq!(number_to_words(1000), "one thousand");
        assert_eq!(number_to_words(12345), "twelve thousand, three hundred forty-five");
        assert_eq!(number_to_words(1_000_000), "one million");
        assert_eq!(number_to_words(2_000_001), "two million, one");
    }

    #[test]
    fn test_ordinal_to_words() {
        assert_eq!(ordinal_to_words(1), "first");
        assert_eq!(ordinal_to_words(2), "second");
        assert_eq!(ordinal_to_words(3), "third");
        assert_eq!(ordinal_to_words(11), "eleventh");
        assert_eq!(ordinal_to_words(12), "twelfth");
        assert_eq!(ordinal_to_words(20), "twentieth");
        assert_eq!(ordinal_to_words(21), "twenty-first");
        assert_eq!(ordinal_to_words(100), "one hundredth");
        assert_eq!(ordinal_to_words(108), "one hundred eighth");
    }

    #[test]
    fn test_digits_to_words() {
        assert_eq!(digits_to_words("407"), "four zero seven");
    }

    #[test]
    fn test_cardinals_in_sentence() {
        assert_eq!(normalize_numbers("I have 3 dogs."), "I have three dogs.");
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(normalize_numbers("1,000"), "one thousand");
        assert_eq!(remove_commas("12,345 and 1,000,000"), "12345 and 1000000");
    }

    #[test]
    fn test_dollars() {
        assert_eq!(normalize_numbers("$4.50"), "four dollars, fifty cents");
        assert_eq!(normalize_numbers("$0"), "zero dollars");
        assert_eq!(normalize_numbers("$1"), "one dollar");
        assert_eq!(normalize_numbers("$0.01"), "one cent");
        assert_eq!(normalize_numbers("$1,250"), "one thousand, two hundred fifty dollars");
    }

    #[test]
    fn test_malformed_dollars_fall_back() {
        assert_eq!(expand_dollars("$1.2.3"), "1.2.3 dollars");
    }

    #[test]
    fn test_pounds() {
        assert_eq!(expand_pounds("£1"), "1 pound");
        assert_eq!(normalize_numbers("£20"), "twenty pounds");
    }

    #[test]
    fn test_decimal_point() {
        assert_eq!(expand_decimal_point("3.14"), "3 point 14");
        assert_eq!(normalize_numbers("3.14"), "three point fourteen");
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(normalize_numbers("21st"), "twenty-first");
        assert_eq!(
            normalize_numbers("She finished 1st, he came 2nd, I was 3rd."),
            "She finished first, he came second, I was third."
        );
    }

    #[test]
    fn test_huge_number_reads_digits() {
        assert_eq!(
            normalize_numbers("99999999999999999999999"),
            digits_to_words("99999999999999999999999")
        );
    }

    #[test]
    fn test_text_without_numbers_is_unchanged() {
        let s = "No digits here, only words.";
        assert_eq!(normalize_numbers(s), s);
    }
}
