//! Pitch and chord theory
//!
//! Pitches follow the document convention `octave * 12 + pitch class`, so
//! `c5` is MIDI note 60. Chords are voiced from the reference octave.

use crate::error::ParseError;
use std::fmt;

/// Octave chords are voiced from (C5 = 60)
pub const REFERENCE_OCTAVE: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accidental {
    Sharp,
    Flat,
}

impl Accidental {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '#' => Some(Accidental::Sharp),
            'b' => Some(Accidental::Flat),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Accidental::Sharp => '#',
            Accidental::Flat => 'b',
        }
    }

    fn offset(self) -> i32 {
        match self {
            Accidental::Sharp => 1,
            Accidental::Flat => -1,
        }
    }
}

/// A letter plus optional accidental, independent of octave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitchName {
    letter: char,
    accidental: Option<Accidental>,
}

impl PitchName {
    /// Accepts `a`-`g` in either case; the letter is stored lowercase
    pub fn new(letter: char, accidental: Option<Accidental>) -> Option<Self> {
        let letter = letter.to_ascii_lowercase();
        matches!(letter, 'a'..='g').then_some(Self { letter, accidental })
    }

    /// Parses `C`, `F#`, `bb` and friends
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let letter = chars.next()?;
        let accidental = match chars.next() {
            None => None,
            Some(c) => Some(Accidental::from_char(c)?),
        };
        if chars.next().is_some() {
            return None;
        }
        Self::new(letter, accidental)
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    pub fn accidental(&self) -> Option<Accidental> {
        self.accidental
    }

    /// Semitones above C, before octave wrapping (`cb` is -1)
    fn semitone(&self) -> i32 {
        let natural = match self.letter {
            'c' => 0,
            'd' => 2,
            'e' => 4,
            'f' => 5,
            'g' => 7,
            'a' => 9,
            _ => 11,
        };
        natural + self.accidental.map_or(0, Accidental::offset)
    }

    pub fn pitch_class(&self) -> u8 {
        self.semitone().rem_euclid(12) as u8
    }

    /// MIDI note number of this pitch in `octave`
    pub fn in_octave(&self, octave: i32) -> Result<u8, ParseError> {
        let pitch = octave * 12 + self.semitone();
        u8::try_from(pitch)
            .ok()
            .filter(|p| *p <= 127)
            .ok_or(ParseError::PitchOutOfRange(pitch))
    }
}

impl fmt::Display for PitchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter)?;
        if let Some(acc) = self.accidental {
            write!(f, "{}", acc.as_char())?;
        }
        Ok(())
    }
}

/// Semitone offsets from the root for every accepted chord quality
const CHORD_QUALITIES: &[(&str, &[u8])] = &[
    // Triads
    ("", &[0, 4, 7]),
    ("M", &[0, 4, 7]),
    ("maj", &[0, 4, 7]),
    ("m", &[0, 3, 7]),
    ("min", &[0, 3, 7]),
    ("dim", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("+", &[0, 4, 8]),
    ("sus2", &[0, 2, 7]),
    ("sus4", &[0, 5, 7]),
    ("sus", &[0, 5, 7]),
    // Sixths
    ("6", &[0, 4, 7, 9]),
    ("m6", &[0, 3, 7, 9]),
    ("69", &[0, 4, 7, 9, 14]),
    ("m69", &[0, 3, 7, 9, 14]),
    // Sevenths
    ("7", &[0, 4, 7, 10]),
    ("M7", &[0, 4, 7, 11]),
    ("maj7", &[0, 4, 7, 11]),
    ("m7", &[0, 3, 7, 10]),
    ("min7", &[0, 3, 7, 10]),
    ("mM7", &[0, 3, 7, 11]),
    ("dim7", &[0, 3, 6, 9]),
    ("m7b5", &[0, 3, 6, 10]),
    ("aug7", &[0, 4, 8, 10]),
    ("7#5", &[0, 4, 8, 10]),
    ("7b5", &[0, 4, 6, 10]),
    ("7b9", &[0, 4, 7, 10, 13]),
    ("7#9", &[0, 4, 7, 10, 15]),
    ("7sus4", &[0, 5, 7, 10]),
    ("7sus2", &[0, 2, 7, 10]),
    // Added tones
    ("add9", &[0, 4, 7, 14]),
    ("madd9", &[0, 3, 7, 14]),
    ("add11", &[0, 4, 7, 17]),
    ("add2", &[0, 2, 4, 7]),
    ("add4", &[0, 4, 5, 7]),
    // Extensions
    ("9", &[0, 4, 7, 10, 14]),
    ("M9", &[0, 4, 7, 11, 14]),
    ("m9", &[0, 3, 7, 10, 14]),
    ("11", &[0, 4, 7, 10, 14, 17]),
    ("M11", &[0, 4, 7, 11, 14, 17]),
    ("m11", &[0, 3, 7, 10, 14, 17]),
    ("13", &[0, 4, 7, 10, 14, 17, 21]),
    ("M13", &[0, 4, 7, 11, 14, 17, 21]),
    ("m13", &[0, 3, 7, 10, 14, 17, 21]),
];

pub fn chord_intervals(quality: &str) -> Option<&'static [u8]> {
    CHORD_QUALITIES
        .iter()
        .find(|(name, _)| *name == quality)
        .map(|(_, intervals)| *intervals)
}

/// Every quality the step grammar accepts
pub fn chord_qualities() -> impl Iterator<Item = &'static str> {
    CHORD_QUALITIES.iter().map(|(name, _)| *name)
}

/// Pitches of a chord voiced from the reference octave.
///
/// A slash bass sits one octave below the reference octave. It is dropped
/// only when its pitch class is already in the chord and it would not be the
/// lowest voice; otherwise it is prepended.
pub fn chord_notes(
    root: PitchName,
    quality: &str,
    bass: Option<PitchName>,
) -> Result<Vec<u8>, ParseError> {
    let intervals =
        chord_intervals(quality).ok_or_else(|| ParseError::InvalidChordQuality(quality.into()))?;
    let base = root.in_octave(REFERENCE_OCTAVE)?;

    let mut notes = Vec::with_capacity(intervals.len() + 1);
    for interval in intervals {
        let pitch = base as i32 + *interval as i32;
        if pitch > 127 {
            return Err(ParseError::PitchOutOfRange(pitch));
        }
        notes.push(pitch as u8);
    }

    if let Some(bass) = bass {
        let bass_pitch = bass.in_octave(REFERENCE_OCTAVE - 1)?;
        let shared = notes.iter().any(|n| n % 12 == bass.pitch_class());
        let lowest = notes.iter().all(|n| bass_pitch < *n);
        if !shared || lowest {
            notes.insert(0, bass_pitch);
        }
    }

    Ok(notes)
}

/// Display name in step syntax, e.g. 60 -> "c5"
pub fn midi_note_name(note: u8) -> String {
    let note_names = ["c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b"];
    let octave = note / 12;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
