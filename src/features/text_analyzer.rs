use super::{FeatureExtractor, FeatureSet};
use crate::email::ParsedEmail;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}\p{N}]+)*").unwrap();
    static ref SENTENCE_SPLIT_RE: Regex = Regex::new(r"[.!?]+").unwrap();
}

const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// Lexical statistics over the body text.
pub struct TextAnalyzer;

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Lowercased word tokens.
    pub fn tokenize(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        WORD_RE
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    pub fn sentence_count(text: &str) -> usize {
        SENTENCE_SPLIT_RE
            .split(text)
            .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
            .count()
    }

    pub fn unique_word_ratio(tokens: &[String]) -> f64 {
        if tokens.is_empty() {
            return 0.0;
        }
        let unique: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
        unique.len() as f64 / tokens.len() as f64
    }

    pub fn uppercase_ratio(text: &str) -> f64 {
        let total = text.chars().count();
        if total == 0 {
            return 0.0;
        }
        text.chars().filter(|c| c.is_uppercase()).count() as f64 / total as f64
    }

    /// Vowel-group syllable estimate with silent-e correction.
    fn syllables(word: &str) -> usize {
        let mut count = 0;
        let mut prev_vowel = false;
        for c in word.chars() {
            let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
            if vowel && !prev_vowel {
                count += 1;
            }
            prev_vowel = vowel;
        }
        if count > 1 && word.ends_with('e') && !word.ends_with("le") {
            count -= 1;
        }
        count.max(1)
    }

    /// Flesch reading ease; 0 when there is nothing to read.
    pub fn readability(tokens: &[String], sentences: usize) -> f64 {
        if tokens.is_empty() {
            return 0.0;
        }
        let words = tokens.len() as f64;
        let sentences = sentences.max(1) as f64;
        let syllables: usize = tokens.iter().map(|t| Self::syllables(t)).sum();
        206.835 - 1.015 * (words / sentences) - 84.6 * (syllables as f64 / words)
    }
}

impl FeatureExtractor for TextAnalyzer {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet) {
        let text = email.body.as_str();
        if text.is_empty() {
            return;
        }

        let tokens = Self::tokenize(text);
        let sentences = Self::sentence_count(text);
        let avg_word_length = if tokens.is_empty() {
            0.0
        } else {
            tokens.iter().map(|t| t.chars().count()).sum::<usize>() as f64 / tokens.len() as f64
        };

        features.set_number("word_count", tokens.len() as f64);
        features.set_number("char_count", text.chars().count() as f64);
        features.set_number("sentence_count", sentences as f64);
        features.set_number("avg_word_length", avg_word_length);
        features.set_number("unique_word_ratio", Self::unique_word_ratio(&tokens));
        features.set_number("uppercase_ratio", Self::uppercase_ratio(text));
        features.set_number(
            "punctuation_count",
            text.chars().filter(|c| PUNCTUATION.contains(c)).count() as f64,
        );
        features.set_number("readability_score", Self::readability(&tokens, sentences));
    }

    fn name(&self) -> &str {
        "text"
    }
}
