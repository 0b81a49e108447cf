//! beefstep - a text step sequencer
//!
//! This library provides the pieces for playing step documents over MIDI:
//! - Parsing of `beef` blocks into parts and arrangements
//! - Generators that write step lines for you
//! - A clock-driven playback engine with leader/follower transport sync
//! - midir-backed MIDI ports

pub mod clock;
pub mod error;
pub mod generators;
pub mod midi;
pub mod music;
pub mod parser;
pub mod sequence;
pub mod sequencer;

// Re-export commonly used types
pub use error::{Error, PlaybackError};
pub use midi::{MidiInputDevice, MidiMessage, MidiOutputDevice};
pub use music::midi_note_name;
pub use sequence::{Arrangement, Part, Playable, Sequence, SyncMode};
pub use sequencer::{PlaybackEngine, PlaybackState, Ports};
