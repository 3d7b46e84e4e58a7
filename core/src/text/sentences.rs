//! Sentence tokenization.
//!
//! Sentences end at `.`, `!`, `?` or `…` (optionally followed by closing quotes or
//! brackets) when the next non-space character starts a new sentence. Periods after
//! known abbreviations, digits and runs of capital initials ("A. H. Tammsaare") do not
//! end a sentence. A lone capital letter does: "plaan B. Homme".

use std::collections::HashSet;

use once_cell::sync::Lazy;

static ABBREVIATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "nt", "jne", "jm", "vms", "dr", "hr", "pr", "prl", "lk", "nr", "tel", "vt", "u", "ca",
        "st", "mr", "mrs", "ms", "e.g", "i.e", "etc",
    ]
    .into_iter()
    .collect()
});

const TERMINATORS: [char; 4] = ['.', '!', '?', '…'];
const CLOSERS: [char; 5] = ['"', '\'', ')', ']', '»'];

/// Splits a text into sentences.
pub trait SentenceTokenizer: Send + Sync {
    fn sentences(&self, text: &str) -> Vec<String>;
}

/// Punctuation-driven tokenizer with an abbreviation list.
#[derive(Debug, Default, Clone)]
pub struct RuleSentenceTokenizer;

impl RuleSentenceTokenizer {
    pub fn new() -> Self {
        Self
    }

    fn is_abbreviation(word_before_period: &str) -> bool {
        let word = word_before_period
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        !word.is_empty() && ABBREVIATIONS.contains(word.as_str())
    }

    /// A single capital letter, e.g. the `H` of "A. H. Tammsaare".
    fn is_capital_letter(word: &str) -> bool {
        let mut chars = word.trim_start_matches(|c: char| !c.is_alphanumeric()).chars();
        matches!((chars.next(), chars.next()), (Some(c), None) if c.is_uppercase())
    }

    /// A whole token such as `H.`.
    fn is_initial(token: &str) -> bool {
        token.strip_suffix('.').map_or(false, Self::is_capital_letter)
    }
}

impl SentenceTokenizer for RuleSentenceTokenizer {
    fn sentences(&self, text: &str) -> Vec<String> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut sentences = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;

        while i < chars.len() {
            let (_, c) = chars[i];
            if !TERMINATORS.contains(&c) {
                i += 1;
                continue;
            }

            // consume runs like "?!" or "..." and trailing closers
            let mut end = i + 1;
            while end < chars.len() && TERMINATORS.contains(&chars[end].1) {
                end += 1;
            }
            while end < chars.len() && CLOSERS.contains(&chars[end].1) {
                end += 1;
            }

            let at_end = end >= chars.len();
            let followed_by_space = !at_end && chars[end].1.is_whitespace();
            if !at_end && !followed_by_space {
                i = end;
                continue;
            }

            let byte_end = chars.get(end).map_or(text.len(), |(pos, _)| *pos);

            if !at_end {
                let next = chars[end..].iter().find(|(_, ch)| !ch.is_whitespace());
                let single_period = c == '.' && end == i + 1;
                if single_period {
                    let before = &text[start..chars[i].0];
                    let last_word = before.rsplit(char::is_whitespace).next().unwrap_or("");
                    let previous_token = before[..before.len() - last_word.len()]
                        .split_whitespace()
                        .next_back()
                        .unwrap_or("");
                    let next_token = text[byte_end..].split_whitespace().next().unwrap_or("");
                    let initial = Self::is_capital_letter(last_word)
                        && (Self::is_initial(previous_token) || Self::is_initial(next_token));
                    let lowercase_next = next.map_or(false, |(_, ch)| ch.is_lowercase());
                    let digit_before = last_word.chars().last().map_or(false, |ch| ch.is_ascii_digit());
                    if Self::is_abbreviation(last_word) || initial || lowercase_next || digit_before {
                        i = end;
                        continue;
                    }
                }
            }

            let sentence = text[start..byte_end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = byte_end;
            i = end;
        }

        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
        sentences
    }
}
