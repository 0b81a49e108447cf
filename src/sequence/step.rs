//! Raw step lines and their `*N` / `*N%M` repeat suffix

use crate::error::ParseError;
use regex::Regex;
use std::sync::OnceLock;

fn modulo_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*(\d+)%(\d+)").expect("valid modulo pattern"))
}

fn repeat_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*(\d+)$").expect("valid repeat pattern"))
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z'_-]+").expect("valid name pattern"))
}

/// How many times a step plays and which copies sound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeat {
    pub times: usize,
    /// 0 means every copy sounds
    pub modulo: usize,
}

impl Default for Repeat {
    fn default() -> Self {
        Self { times: 1, modulo: 0 }
    }
}

impl Repeat {
    /// Whether the 1-indexed copy `position` carries the step's content
    pub fn sounds(&self, position: usize) -> bool {
        self.modulo == 0 || position % self.modulo == 0
    }
}

/// One authored step line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    text: String,
}

impl Step {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn repeat(&self) -> Result<Repeat, ParseError> {
        let parse = |digits: &str| {
            digits
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidNumber(digits.to_string()))
        };

        let repeat = if let Some(cap) = modulo_regex().captures(&self.text) {
            Repeat {
                times: parse(&cap[1])?,
                modulo: parse(&cap[2])?,
            }
        } else if let Some(cap) = repeat_regex().captures(self.text.trim_end()) {
            Repeat {
                times: parse(&cap[1])?,
                modulo: 0,
            }
        } else {
            Repeat::default()
        };

        if repeat.times == 0 {
            return Err(ParseError::ZeroMultiplier(self.text.clone()));
        }
        Ok(repeat)
    }

    /// Words that look like playable names
    pub fn names(&self) -> Vec<&str> {
        self.text
            .split_whitespace()
            .filter(|word| name_regex().is_match(word))
            .collect()
    }
}
