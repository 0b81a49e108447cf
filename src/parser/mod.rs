//! Document parsing
//!
//! A document is free text with fenced ```` ```beef ```` blocks. The first
//! line of a block is a directive plus inline metadata, every following line
//! is one step.

pub mod metadata;
pub mod step;

use crate::error::{Error, ParseError};
use regex::Regex;
use std::sync::OnceLock;

/// Implemented by token enums so [`TokenStream`] can find the end marker
pub(crate) trait Lexeme {
    fn is_end(&self) -> bool;
}

/// Cursor over a lexed token vector that always ends with an end token
pub(crate) struct TokenStream<T> {
    tokens: Vec<T>,
    current: usize,
}

impl<T: Lexeme> TokenStream<T> {
    pub(crate) fn new(tokens: Vec<T>) -> Self {
        debug_assert!(tokens.last().is_some_and(Lexeme::is_end));
        Self { tokens, current: 0 }
    }

    pub(crate) fn peek(&self) -> &T {
        &self.tokens[self.current]
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().is_end()
    }

    /// Returns the current token and moves past it; stays put at the end
    pub(crate) fn advance(&mut self) -> &T {
        let idx = self.current;
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[idx]
    }

    /// Consumes the current token only if `pred` accepts it
    pub(crate) fn next_if(&mut self, pred: impl Fn(&T) -> bool) -> Option<&T> {
        if !self.is_at_end() && pred(self.peek()) {
            Some(self.advance())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Sequence,
    Part,
    Arrangement,
    /// `.func.<generator>`
    Func(String),
}

impl Directive {
    fn parse(word: &str) -> Result<Self, ParseError> {
        match word {
            ".sequence" => Ok(Directive::Sequence),
            ".part" => Ok(Directive::Part),
            ".arrangement" => Ok(Directive::Arrangement),
            _ => match word.strip_prefix(".func.") {
                Some(name) if !name.is_empty() => Ok(Directive::Func(name.to_string())),
                _ => Err(ParseError::UnknownDirective(word.to_string())),
            },
        }
    }
}

/// One fenced block of a document
#[derive(Debug, Clone)]
pub struct Block {
    pub directive: Directive,
    /// Whole directive line, handed to the metadata grammar
    pub header: String,
    pub steps: Vec<String>,
    /// 1-based line of the opening fence
    pub line: usize,
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?sm)^```beef(.*?)\n^```").expect("valid block pattern"))
}

/// Extracts every ```` ```beef ```` block in document order
pub fn blocks(document: &str) -> Result<Vec<Block>, Error> {
    let mut blocks = Vec::new();

    for cap in block_regex().captures_iter(document) {
        let (Some(whole), Some(body)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let line = document[..whole.start()].matches('\n').count() + 1;

        let mut lines = body.as_str().split('\n');
        let header = lines.next().unwrap_or_default().trim().to_string();
        let word = header.split_whitespace().next().unwrap_or_default();
        let directive =
            Directive::parse(word).map_err(|source| Error::Syntax { line, source })?;

        blocks.push(Block {
            directive,
            steps: lines.map(|l| l.trim_end_matches('\r').to_string()).collect(),
            header,
            line,
        });
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_part_block() {
        let doc = "# Song\n\nSome notes.\n\n```beef.part name:bass ch:2\nc2:4\n\ne2\n```\n\nMore text.\n";
        let blocks = blocks(doc).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].directive, Directive::Part);
        assert_eq!(blocks[0].header, ".part name:bass ch:2");
        assert_eq!(blocks[0].steps, vec!["c2:4", "", "e2"]);
        assert_eq!(blocks[0].line, 5);
    }

    #[test]
    fn test_extract_multiple_blocks() {
        let doc = "```beef.sequence bpm:90\n```\n```beef.func.euclidean name:kick pulses:3 steps:8 note:c2\n```\n```beef.arrangement name:a\nkick\n```\n";
        let blocks = blocks(doc).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].directive, Directive::Sequence);
        assert!(blocks[0].steps.is_empty());
        assert_eq!(blocks[1].directive, Directive::Func("euclidean".into()));
        assert_eq!(blocks[2].directive, Directive::Arrangement);
        assert_eq!(blocks[2].line, 5);
    }

    #[test]
    fn test_other_fences_are_ignored() {
        let doc = "```rust\nfn main() {}\n```\n";
        assert!(blocks(doc).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_directive() {
        let err = blocks("text\n```beef.song\n```\n").unwrap_err();
        assert_eq!(
            err,
            Error::Syntax {
                line: 2,
                source: ParseError::UnknownDirective(".song".into())
            }
        );
    }
}
