//! Playback: transport state, signal buses and the clock-driven scheduler

pub mod bus;
pub mod cancel;
pub mod playback;
pub mod transport;

pub use bus::Bus;
pub use cancel::CancelToken;
pub use playback::{ErrorQueue, PlaybackEngine, Ports, ERROR_QUEUE_CAPACITY};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
        })
    }
}

const STOPPED: u8 = 0;
const PLAYING: u8 = 1;

/// Shared playing/stopped flag
#[derive(Debug)]
pub struct State(AtomicU8);

impl Default for State {
    fn default() -> Self {
        Self(AtomicU8::new(STOPPED))
    }
}

impl State {
    /// Moves to playing; false if already playing
    pub fn play(&self) -> bool {
        self.0
            .compare_exchange(STOPPED, PLAYING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stop(&self) {
        self.0.store(STOPPED, Ordering::Release);
    }

    pub fn get(&self) -> PlaybackState {
        match self.0.load(Ordering::Acquire) {
            PLAYING => PlaybackState::Playing,
            _ => PlaybackState::Stopped,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.get() == PlaybackState::Playing
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == PlaybackState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = State::default();
        assert!(state.is_stopped());
        assert!(state.play());
        assert!(state.is_playing());
        assert!(!state.play());
        state.stop();
        assert_eq!(state.get(), PlaybackState::Stopped);
        assert_eq!(state.get().to_string(), "stopped");
    }
}
