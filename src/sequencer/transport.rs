//! Follower side of transport sync: Start, Stop and Timing Clock from the
//! sync input drive the engine's buses

use super::playback::{Engine, PlaybackEngine};
use crate::error::PortError;
use crate::midi::MidiMessage;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

impl PlaybackEngine {
    /// Listens on the sync input. Without one this is a no-op.
    pub fn listen_sync(&self) -> Result<(), PortError> {
        let Some(port) = self.inner.sync_in.clone() else {
            return Ok(());
        };

        let weak: Weak<Engine> = Arc::downgrade(&self.inner);
        port.listen(Box::new(move |bytes| {
            if let Some(inner) = weak.upgrade() {
                PlaybackEngine { inner }.handle_sync(bytes);
            }
        }))?;
        info!("listening for transport sync");
        Ok(())
    }

    pub fn stop_sync(&self) {
        if let Some(port) = &self.inner.sync_in {
            port.stop_listening();
        }
    }

    /// Start and Stop are only acted on in the matching state; clock pulses
    /// only advance a running play
    pub fn handle_sync(&self, bytes: &[u8]) {
        let Some(message) = MidiMessage::from_bytes(bytes) else {
            return;
        };

        match message {
            MidiMessage::Start if self.inner.state.is_stopped() => {
                debug!("sync start");
                self.inner.play_bus.publish();
            }
            MidiMessage::Stop if self.inner.state.is_playing() => {
                debug!("sync stop");
                self.inner.stop_bus.publish();
            }
            MidiMessage::TimingClock if self.inner.state.is_playing() => {
                self.inner.pulse_bus.publish();
            }
            _ => {}
        }
    }
}
