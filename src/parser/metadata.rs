//! Metadata grammar: `key:value` pairs following a block directive
//!
//! The lexer produces identifiers, colons, numbers, booleans and quoted
//! strings. A digit run that turns into letters before whitespace lexes as an
//! identifier, so `div:8th-triplet` keeps its value whole.

use super::{Lexeme, TokenStream};
use crate::error::ParseError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Colon,
    Number(String),
    Boolean(bool),
    Quoted(String),
    Illegal(String),
    End,
}

impl Lexeme for Token {
    fn is_end(&self) -> bool {
        matches!(self, Token::End)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Identifier(s) | Token::Number(s) | Token::Illegal(s) => f.write_str(s),
            Token::Colon => f.write_str(":"),
            Token::Boolean(b) => write!(f, "{b}"),
            Token::Quoted(s) => write!(f, "{s:?}"),
            Token::End => f.write_str("end of line"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let negative_number = c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());

        if c.is_whitespace() {
            i += 1;
        } else if c == ':' {
            tokens.push(Token::Colon);
            i += 1;
        } else if c == '"' || c == '\'' {
            let start = i + 1;
            let close = chars[start..].iter().position(|&q| q == c);
            match close {
                Some(len) => {
                    tokens.push(Token::Quoted(chars[start..start + len].iter().collect()));
                    i = start + len + 1;
                }
                None => {
                    tokens.push(Token::Illegal(chars[i..].iter().collect()));
                    i = chars.len();
                }
            }
        } else if c.is_ascii_digit() || negative_number {
            let start = i;
            // a letter anywhere in the run makes it an identifier
            let run = chars[start + 1..]
                .iter()
                .take_while(|c| is_word_char(**c))
                .count()
                + 1;
            let word: String = chars[start..start + run].iter().collect();
            if word[1..].chars().any(char::is_alphabetic) {
                tokens.push(Token::Identifier(word));
                i = start + run;
            } else {
                let len = chars[start + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit() || **c == '.')
                    .count()
                    + 1;
                tokens.push(Token::Number(chars[start..start + len].iter().collect()));
                i = start + len;
            }
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() && chars[i] != ':' {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(match word.as_str() {
                "true" => Token::Boolean(true),
                "false" => Token::Boolean(false),
                _ => Token::Identifier(word),
            });
        }
    }

    tokens.push(Token::End);
    tokens
}

/// A typed metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Boolean(bool),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

fn invalid(key: &'static str, value: &Value) -> ParseError {
    ParseError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

/// Parsed `key -> value` map of one directive line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    fields: HashMap<String, Value>,
}

impl Metadata {
    /// Parses a directive line; a leading directive identifier is skipped
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut stream = TokenStream::new(tokenize(input));
        let mut fields = HashMap::new();

        if input.trim_start().starts_with('.') {
            stream.next_if(|t| matches!(t, Token::Identifier(_)));
        }

        while !stream.is_at_end() {
            let key = match stream.advance() {
                Token::Identifier(key) => key.clone(),
                Token::Illegal(s) => return Err(ParseError::UnterminatedString(s.clone())),
                other => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "identifier",
                        found: other.to_string(),
                    })
                }
            };

            if stream.next_if(|t| matches!(t, Token::Colon)).is_none() {
                return Err(ParseError::UnexpectedToken {
                    expected: "':'",
                    found: stream.peek().to_string(),
                });
            }

            let value = match stream.advance() {
                Token::Number(literal) => Value::Number(
                    literal
                        .parse()
                        .map_err(|_| ParseError::InvalidNumber(literal.clone()))?,
                ),
                Token::Boolean(b) => Value::Boolean(*b),
                Token::Identifier(s) | Token::Quoted(s) => Value::Text(s.clone()),
                Token::Illegal(s) => return Err(ParseError::UnterminatedString(s.clone())),
                other => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "value",
                        found: other.to_string(),
                    })
                }
            };

            fields.insert(key, value);
        }

        Ok(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.fields.get(key)? {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Like [`Metadata::number`], but a value of another type is an error
    pub fn require_number(&self, key: &'static str) -> Result<Option<f64>, ParseError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(invalid(key, other)),
        }
    }

    /// Like [`Metadata::boolean`], but a value of another type is an error
    pub fn require_boolean(&self, key: &'static str) -> Result<Option<bool>, ParseError> {
        match self.fields.get(key) {
            None => Ok(None),
            Some(Value::Boolean(b)) => Ok(Some(*b)),
            Some(other) => Err(invalid(key, other)),
        }
    }

    /// Any value rendered as text, so `name:808` still names a part
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Text(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
        }
    }

    fn text_or(&self, key: &str, default: &str) -> String {
        self.text(key).unwrap_or_else(|| default.to_string())
    }
}

/// Transport role of this instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    None,
    Leader,
    Follower,
}

impl SyncMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(SyncMode::None),
            "leader" => Some(SyncMode::Leader),
            "follower" => Some(SyncMode::Follower),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::None => "none",
            SyncMode::Leader => "leader",
            SyncMode::Follower => "follower",
        })
    }
}

/// Settings from a `.sequence` block
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceMetadata {
    pub bpm: f64,
    pub looping: bool,
    pub sync: SyncMode,
    pub sync_in: String,
    pub sync_out: String,
    pub voice_out: String,
}

impl Default for SequenceMetadata {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            looping: false,
            sync: SyncMode::None,
            sync_in: String::new(),
            sync_out: String::new(),
            voice_out: String::new(),
        }
    }
}

impl SequenceMetadata {
    pub fn from_metadata(meta: &Metadata) -> Result<Self, ParseError> {
        let defaults = Self::default();

        let bpm = meta.require_number("bpm")?.unwrap_or(defaults.bpm);
        if !(bpm > 0.0 && bpm.is_finite()) {
            return Err(ParseError::InvalidValue {
                key: "bpm",
                value: bpm.to_string(),
            });
        }

        let sync = match meta.text("sync") {
            None => defaults.sync,
            Some(value) => SyncMode::parse(&value)
                .ok_or(ParseError::InvalidValue { key: "sync", value })?,
        };

        Ok(Self {
            bpm,
            looping: meta.require_boolean("loop")?.unwrap_or(defaults.looping),
            sync,
            sync_in: meta.text_or("syncin", ""),
            sync_out: meta.text_or("syncout", ""),
            voice_out: meta.text_or("voiceout", ""),
        })
    }
}

/// Pulses per step for a symbolic `div` value
pub fn division_for(symbol: &str) -> Option<u32> {
    match symbol {
        "4th" => Some(24),
        "4th-triplet" => Some(16),
        "8th" => Some(12),
        "8th-triplet" => Some(8),
        "16th" => Some(6),
        "32nd" => Some(3),
        _ => None,
    }
}

/// Settings from a `.part` or `.func.*` block
#[derive(Debug, Clone, PartialEq)]
pub struct PartMetadata {
    pub name: String,
    pub group: String,
    pub channel: u8,
    pub division: u32,
    pub warnings: Vec<String>,
}

impl PartMetadata {
    pub fn from_metadata(meta: &Metadata) -> Result<Self, ParseError> {
        let mut warnings = Vec::new();

        let ch = meta.require_number("ch")?.unwrap_or(1.0);
        if !(1.0..=16.0).contains(&ch) || ch.fract() != 0.0 {
            return Err(ParseError::ChannelOutOfRange(ch));
        }

        let division = match meta.text("div") {
            None => 24,
            Some(symbol) => division_for(&symbol).unwrap_or_else(|| {
                warnings.push(format!("unknown div '{symbol}', using 4th"));
                24
            }),
        };

        Ok(Self {
            name: meta.text_or("name", "default"),
            group: meta.text_or("group", "default"),
            channel: ch as u8,
            division,
            warnings,
        })
    }
}

/// Settings from an `.arrangement` block
#[derive(Debug, Clone, PartialEq)]
pub struct ArrangementMetadata {
    pub name: String,
    pub group: String,
}

impl ArrangementMetadata {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            name: meta.text_or("name", "default"),
            group: meta.text_or("group", "default"),
        }
    }
}
