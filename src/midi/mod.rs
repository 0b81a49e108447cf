//! MIDI messages and ports
//!
//! Ports are trait objects so playback can run against real midir devices or
//! in-memory recorders. Empty port names open a virtual port where the
//! platform supports it.

use crate::error::PortError;
use crate::music::midi_note_name;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::info;

#[cfg(unix)]
use midir::os::unix::{VirtualInput, VirtualOutput};

const CLIENT_NAME: &str = "beefstep";

/// Virtual port names used when no port is configured
pub const DEFAULT_VOICE_PORT: &str = "beefstep";
pub const DEFAULT_SYNC_PORT: &str = "beefstep-sync";

/// Controller number for All Notes Off
pub const ALL_NOTES_OFF: u8 = 123;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
const TIMING_CLOCK: u8 = 0xF8;
const START: u8 = 0xFA;
const STOP: u8 = 0xFC;

/// The subset of MIDI the sequencer sends and understands.
/// Channels are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    TimingClock,
    Start,
    Stop,
}

impl MidiMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, note } => {
                vec![NOTE_OFF | (channel & 0x0F), note & 0x7F, 0]
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![CONTROL_CHANGE | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            MidiMessage::TimingClock => vec![TIMING_CLOCK],
            MidiMessage::Start => vec![START],
            MidiMessage::Stop => vec![STOP],
        }
    }

    /// Decodes one message; anything outside the supported subset is `None`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        match status {
            TIMING_CLOCK => Some(MidiMessage::TimingClock),
            START => Some(MidiMessage::Start),
            STOP => Some(MidiMessage::Stop),
            _ => {
                let channel = status & 0x0F;
                let data = bytes.get(1..3)?;
                match status & 0xF0 {
                    NOTE_ON if data[1] > 0 => Some(MidiMessage::NoteOn {
                        channel,
                        note: data[0],
                        velocity: data[1],
                    }),
                    NOTE_ON | NOTE_OFF => Some(MidiMessage::NoteOff {
                        channel,
                        note: data[0],
                    }),
                    CONTROL_CHANGE => Some(MidiMessage::ControlChange {
                        channel,
                        controller: data[0],
                        value: data[1],
                    }),
                    _ => None,
                }
            }
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MidiMessage::TimingClock | MidiMessage::Start | MidiMessage::Stop
        )
    }
}

/// Log form with 1-based channels and note names, e.g. `on ch1 c5 vel100`
impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "on ch{} {} vel{velocity}", channel + 1, midi_note_name(note)),
            MidiMessage::NoteOff { channel, note } => {
                write!(f, "off ch{} {}", channel + 1, midi_note_name(note))
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "cc ch{} {controller}={value}", channel + 1),
            MidiMessage::TimingClock => f.write_str("clock"),
            MidiMessage::Start => f.write_str("start"),
            MidiMessage::Stop => f.write_str("stop"),
        }
    }
}

/// All Notes Off on every channel
pub fn silence_all() -> impl Iterator<Item = MidiMessage> {
    (0..16).map(|channel| MidiMessage::ControlChange {
        channel,
        controller: ALL_NOTES_OFF,
        value: 0,
    })
}

/// Something playback can send raw bytes to. Implementations serialize
/// concurrent sends.
pub trait OutputPort: Send + Sync {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError>;
}

pub type InputCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Something that delivers incoming bytes to a callback
pub trait InputPort: Send + Sync {
    fn listen(&self, callback: InputCallback) -> Result<(), PortError>;
    fn stop_listening(&self);
}

/// Output port names as reported by the system
pub fn available_outputs() -> Vec<String> {
    if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
        midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect()
    } else {
        vec![]
    }
}

/// Input port names as reported by the system
pub fn available_inputs() -> Vec<String> {
    if let Ok(midi_in) = MidiInput::new(CLIENT_NAME) {
        midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect()
    } else {
        vec![]
    }
}

/// midir output connection
pub struct MidiOutputDevice {
    name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl MidiOutputDevice {
    /// Connects to the first output whose name contains `name`, or creates a
    /// virtual output called `virtual_name` when `name` is empty
    pub fn open(name: &str, virtual_name: &str) -> Result<Self, PortError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| PortError::Init(e.to_string()))?;

        let (name, connection) = if name.is_empty() {
            (virtual_name.to_string(), Self::create_virtual(midi_out, virtual_name)?)
        } else {
            let ports = midi_out.ports();
            let port = ports
                .iter()
                .find(|p| midi_out.port_name(p).is_ok_and(|n| n.contains(name)))
                .ok_or_else(|| PortError::NotFound(name.to_string()))?
                .clone();
            let connection = midi_out
                .connect(&port, CLIENT_NAME)
                .map_err(|e| PortError::Connect(e.to_string()))?;
            (name.to_string(), connection)
        };

        info!(port = %name, "connected MIDI output");
        Ok(Self {
            name,
            connection: Mutex::new(connection),
        })
    }

    #[cfg(unix)]
    fn create_virtual(midi_out: MidiOutput, name: &str) -> Result<MidiOutputConnection, PortError> {
        midi_out
            .create_virtual(name)
            .map_err(|e| PortError::Connect(e.to_string()))
    }

    #[cfg(not(unix))]
    fn create_virtual(_midi_out: MidiOutput, _name: &str) -> Result<MidiOutputConnection, PortError> {
        Err(PortError::Unsupported)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl OutputPort for MidiOutputDevice {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        let mut conn = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        conn.send(bytes).map_err(|e| PortError::Send(e.to_string()))
    }
}

/// midir input; the connection is opened by `listen` because midir binds the
/// callback at connect time
pub struct MidiInputDevice {
    name: String,
    is_virtual: bool,
    connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl MidiInputDevice {
    /// Same naming rules as [`MidiOutputDevice::open`]
    pub fn open(name: &str, virtual_name: &str) -> Self {
        if name.is_empty() {
            Self {
                name: virtual_name.to_string(),
                is_virtual: true,
                connection: Mutex::new(None),
            }
        } else {
            Self {
                name: name.to_string(),
                is_virtual: false,
                connection: Mutex::new(None),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn connect(&self, mut callback: InputCallback) -> Result<MidiInputConnection<()>, PortError> {
        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| PortError::Init(e.to_string()))?;
        // timing clock must come through
        midi_in.ignore(Ignore::SysexAndActiveSense);

        let on_message = move |_stamp: u64, message: &[u8], _: &mut ()| callback(message);

        if self.is_virtual {
            return Self::create_virtual(midi_in, &self.name, on_message);
        }

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).is_ok_and(|n| n.contains(&self.name)))
            .ok_or_else(|| PortError::NotFound(self.name.clone()))?
            .clone();
        midi_in
            .connect(&port, CLIENT_NAME, on_message, ())
            .map_err(|e| PortError::Connect(e.to_string()))
    }

    #[cfg(unix)]
    fn create_virtual<F>(
        midi_in: MidiInput,
        name: &str,
        on_message: F,
    ) -> Result<MidiInputConnection<()>, PortError>
    where
        F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
    {
        midi_in
            .create_virtual(name, on_message, ())
            .map_err(|e| PortError::Connect(e.to_string()))
    }

    #[cfg(not(unix))]
    fn create_virtual<F>(
        _midi_in: MidiInput,
        _name: &str,
        _on_message: F,
    ) -> Result<MidiInputConnection<()>, PortError>
    where
        F: FnMut(u64, &[u8], &mut ()) + Send + 'static,
    {
        Err(PortError::Unsupported)
    }
}

impl InputPort for MidiInputDevice {
    fn listen(&self, callback: InputCallback) -> Result<(), PortError> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(PortError::AlreadyListening);
        }
        *slot = Some(self.connect(callback)?);
        info!(port = %self.name, "listening on MIDI input");
        Ok(())
    }

    fn stop_listening(&self) {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = slot.take() {
            connection.close();
        }
    }
}
