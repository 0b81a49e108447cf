//! Error types for document loading and playback
//!
//! Syntax problems abort a load. Port, clock and panic failures during
//! playback are reported through the engine's error queue instead.

use thiserror::Error;

/// Failures of the metadata and step grammars
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("invalid note: {0}")]
    InvalidNote(String),

    #[error("invalid chord root: {0}")]
    InvalidChordRoot(String),

    #[error("invalid chord quality: {0}")]
    InvalidChordQuality(String),

    #[error("invalid bass note: {0}")]
    InvalidBass(String),

    #[error("expected octave number after note {0}")]
    MissingOctave(String),

    #[error("expected duration number after colon")]
    MissingDuration,

    #[error("unterminated string: {0}")]
    UnterminatedString(String),

    #[error("expected {expected}, got {found:?}")]
    UnexpectedToken { expected: &'static str, found: String },

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("pitch {0} is outside the MIDI range")]
    PitchOutOfRange(i32),

    #[error("channel {0} is outside 1-16")]
    ChannelOutOfRange(f64),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("step multiplier must be at least 1: {0}")]
    ZeroMultiplier(String),

    #[error("unknown block directive: {0}")]
    UnknownDirective(String),
}

/// Failures while synthesizing generator steps
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeneratorError {
    #[error("{generator}: missing required parameter '{param}'")]
    MissingParam {
        generator: &'static str,
        param: &'static str,
    },

    #[error("euclidean: pulses and steps must be non-negative")]
    NegativeCount,

    #[error("euclidean: pulses ({pulses}) cannot exceed steps ({steps})")]
    PulsesExceedSteps { pulses: i64, steps: i64 },

    #[error("{0}: no notes provided")]
    EmptyPool(&'static str),

    #[error("unknown generator: {0}")]
    Unknown(String),
}

/// Document load failure; `line` is the 1-based line of the offending block
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("line {line}: {source}")]
    Syntax { line: usize, source: ParseError },

    #[error("line {line}: {source}")]
    Generator { line: usize, source: GeneratorError },
}

/// Physical transport failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PortError {
    #[error("failed to initialise MIDI client: {0}")]
    Init(String),

    #[error("MIDI port '{0}' not found")]
    NotFound(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send MIDI message: {0}")]
    Send(String),

    #[error("input is already listening")]
    AlreadyListening,

    #[error("virtual ports are not supported on this platform")]
    Unsupported,
}

/// Tick source failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    #[error("clock already running")]
    AlreadyRunning,

    #[error("failed to spawn clock thread: {0}")]
    Spawn(String),

    #[error("failed to join clock thread")]
    Join,

    #[error("invalid tempo: {0}")]
    InvalidTempo(f64),
}

/// Everything that can land on the playback error queue
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("panic in playback: {0}")]
    Panic(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
