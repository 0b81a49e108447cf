//! Step grammar: notes and chords on one step line
//!
//! Lowercase letters start a note (`c4`, `f#3:2`), uppercase letters start a
//! chord (`Am7`, `CM7/E:2`). Anything else that is not a number or colon is
//! skipped, so `-` and `.` work as visual rests.

use super::{Lexeme, TokenStream};
use crate::error::ParseError;
use crate::music::{self, Accidental, PitchName};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Letter plus optional accidental, octave follows as a number
    Note(PitchName),
    /// Whole chord symbol up to whitespace or colon
    Chord(String),
    Number(String),
    Colon,
    Illegal(ParseError),
    End,
}

impl Lexeme for Token {
    fn is_end(&self) -> bool {
        matches!(self, Token::End)
    }
}

fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == ':' {
            tokens.push(Token::Colon);
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_lowercase() {
            let start = i;
            i += 1;
            while i < chars.len() && Accidental::from_char(chars[i]).is_some() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            match PitchName::parse(&text) {
                Some(name) => tokens.push(Token::Note(name)),
                None => {
                    tokens.push(Token::Illegal(ParseError::InvalidNote(text)));
                    break;
                }
            }
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i] != ':' && !chars[i].is_whitespace() {
                i += 1;
            }
            if !matches!(c, 'A'..='G') {
                tokens.push(Token::Illegal(ParseError::InvalidChordRoot(c.to_string())));
                break;
            }
            tokens.push(Token::Chord(chars[start..i].iter().collect()));
        } else {
            i += 1;
        }
    }

    tokens.push(Token::End);
    tokens
}

/// A single pitch with its octave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteNode {
    pub name: PitchName,
    pub octave: i32,
    /// Steps to hold; `None` lets the note ring
    pub duration: Option<u32>,
}

impl NoteNode {
    pub fn pitch(&self) -> Result<u8, ParseError> {
        self.name.in_octave(self.octave)
    }
}

impl fmt::Display for NoteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.octave)?;
        if let Some(duration) = self.duration {
            write!(f, ":{duration}")?;
        }
        Ok(())
    }
}

/// A chord symbol, voiced from the reference octave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordNode {
    pub root: PitchName,
    pub quality: String,
    pub bass: Option<PitchName>,
    pub duration: Option<u32>,
}

impl ChordNode {
    pub fn pitches(&self) -> Result<Vec<u8>, ParseError> {
        music::chord_notes(self.root, &self.quality, self.bass)
    }

    fn parse_symbol(symbol: &str) -> Result<Self, ParseError> {
        let (chord, bass) = match symbol.split_once('/') {
            Some((chord, bass)) => {
                let bass = PitchName::parse(bass)
                    .ok_or_else(|| ParseError::InvalidBass(bass.to_string()))?;
                (chord, Some(bass))
            }
            None => (symbol, None),
        };

        let mut chars = chord.chars();
        let letter = chars
            .next()
            .ok_or_else(|| ParseError::InvalidChordRoot(symbol.to_string()))?;
        let accidental = chars.clone().next().and_then(Accidental::from_char);
        let root = PitchName::new(letter, accidental)
            .ok_or_else(|| ParseError::InvalidChordRoot(letter.to_string()))?;

        let root_len = letter.len_utf8() + accidental.map_or(0, |_| 1);
        let quality = &chord[root_len..];
        if music::chord_intervals(quality).is_none() {
            return Err(ParseError::InvalidChordQuality(quality.to_string()));
        }

        Ok(Self {
            root,
            quality: quality.to_string(),
            bass,
            duration: None,
        })
    }
}

impl fmt::Display for ChordNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_upper(f, self.root)?;
        f.write_str(&self.quality)?;
        if let Some(bass) = self.bass {
            f.write_str("/")?;
            write_upper(f, bass)?;
        }
        if let Some(duration) = self.duration {
            write!(f, ":{duration}")?;
        }
        Ok(())
    }
}

fn write_upper(f: &mut fmt::Formatter<'_>, name: PitchName) -> fmt::Result {
    write!(f, "{}", name.letter().to_ascii_uppercase())?;
    if let Some(acc) = name.accidental() {
        write!(f, "{}", acc.as_char())?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Note(NoteNode),
    Chord(ChordNode),
}

impl Node {
    pub fn duration(&self) -> Option<u32> {
        match self {
            Node::Note(note) => note.duration,
            Node::Chord(chord) => chord.duration,
        }
    }

    /// Every MIDI pitch this node sounds
    pub fn pitches(&self) -> Result<Vec<u8>, ParseError> {
        match self {
            Node::Note(note) => Ok(vec![note.pitch()?]),
            Node::Chord(chord) => chord.pitches(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Note(note) => fmt::Display::fmt(note, f),
            Node::Chord(chord) => fmt::Display::fmt(chord, f),
        }
    }
}

/// Parses one step line into its notes and chords
pub fn parse(input: &str) -> Result<Vec<Node>, ParseError> {
    let mut stream = TokenStream::new(tokenize(input));
    let mut nodes = Vec::new();

    while !stream.is_at_end() {
        match stream.advance().clone() {
            Token::Illegal(err) => return Err(err),
            Token::Note(name) => {
                let octave = match stream.next_if(|t| matches!(t, Token::Number(_))) {
                    Some(Token::Number(digits)) => digits
                        .parse()
                        .map_err(|_| ParseError::InvalidNumber(digits.clone()))?,
                    _ => return Err(ParseError::MissingOctave(name.to_string())),
                };
                let note = NoteNode {
                    name,
                    octave,
                    duration: parse_duration(&mut stream)?,
                };
                note.pitch()?;
                nodes.push(Node::Note(note));
            }
            Token::Chord(symbol) => {
                let mut chord = ChordNode::parse_symbol(&symbol)?;
                chord.duration = parse_duration(&mut stream)?;
                chord.pitches()?;
                nodes.push(Node::Chord(chord));
            }
            // stray numbers and colons
            _ => {}
        }
    }

    Ok(nodes)
}

fn parse_duration(stream: &mut TokenStream<Token>) -> Result<Option<u32>, ParseError> {
    if stream.next_if(|t| matches!(t, Token::Colon)).is_none() {
        return Ok(None);
    }
    match stream.next_if(|t| matches!(t, Token::Number(_))) {
        Some(Token::Number(digits)) => digits
            .parse()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber(digits.clone())),
        _ => Err(ParseError::MissingDuration),
    }
}
