//! Query validation, run before any retrieval or model call.
//!
//! Two checks, in order: a character-count ceiling and a case-insensitive
//! blocklist of prompt-injection phrases (plus any configured regexes).

use regex::RegexSet;
use thiserror::Error;

use crate::config::ValidationConfig;

/// Phrases refused in any casing.
const FORBIDDEN_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "system override",
    "delete all data",
    "forget your rules",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Input too long. Please keep queries under {limit} characters.")]
    TooLong { limit: usize, actual: usize },
    #[error("Unsafe input detected. Request refused.")]
    Unsafe { pattern: String },
}

pub struct Validator {
    max_chars: usize,
    patterns: Vec<String>,
    set: RegexSet,
}

impl Validator {
    pub fn new(config: &ValidationConfig) -> Result<Self, regex::Error> {
        let patterns: Vec<String> = FORBIDDEN_PHRASES
            .iter()
            .map(|p| regex::escape(p))
            .chain(config.extra_patterns.iter().cloned())
            .collect();
        let set = RegexSet::new(patterns.iter().map(|p| format!("(?i){}", p)))?;
        Ok(Self {
            max_chars: config.max_query_chars,
            patterns,
            set,
        })
    }

    /// `Ok(())` when `text` may be sent on; otherwise the reason it may not.
    pub fn validate_query(&self, text: &str) -> Result<(), Rejection> {
        let actual = text.chars().count();
        if actual > self.max_chars {
            return Err(Rejection::TooLong {
                limit: self.max_chars,
                actual,
            });
        }
        if let Some(idx) = self.set.matches(text).iter().next() {
            return Err(Rejection::Unsafe {
                pattern: self.patterns[idx].clone(),
            });
        }
        Ok(())
    }
}
