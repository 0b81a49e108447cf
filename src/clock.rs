//! Tick sources at 24 pulses per quarter note

use crate::error::ClockError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Pulses per quarter note
pub const PPQ: u32 = 24;

pub type TickCallback = Box<dyn FnMut() + Send + 'static>;

/// Calls back on every tick until stopped
pub trait Clock: Send {
    fn start(&mut self, on_tick: TickCallback) -> Result<(), ClockError>;
    /// Returns once no further callbacks will fire
    fn stop(&mut self) -> Result<(), ClockError>;
    fn set_tempo(&self, bpm: f64) -> Result<(), ClockError>;
}

/// Length of one tick at `bpm`
pub fn tick_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / bpm / PPQ as f64)
}

/// Thread-driven clock that sleeps until each tick deadline. Deadlines
/// accumulate from the start instant so sleep overshoot does not drift.
pub struct TickClock {
    bpm: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TickClock {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: Arc::new(AtomicU64::new(bpm.to_bits())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Clock for TickClock {
    fn start(&mut self, mut on_tick: TickCallback) -> Result<(), ClockError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ClockError::AlreadyRunning);
        }

        let bpm = Arc::clone(&self.bpm);
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("tick-clock".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now();
                while running.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if next_tick > now {
                        thread::sleep(next_tick - now);
                    }
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    on_tick();
                    next_tick += tick_interval(f64::from_bits(bpm.load(Ordering::Relaxed)));
                }
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(ClockError::Spawn(e.to_string()))
            }
        }
    }

    fn stop(&mut self) -> Result<(), ClockError> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| ClockError::Join)?;
        }
        Ok(())
    }

    fn set_tempo(&self, bpm: f64) -> Result<(), ClockError> {
        if !(bpm > 0.0 && bpm.is_finite()) {
            return Err(ClockError::InvalidTempo(bpm));
        }
        self.bpm.store(bpm.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for TickClock {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
