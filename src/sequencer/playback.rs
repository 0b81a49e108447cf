//! Playback engine - walks an arrangement against clock pulses
//!
//! One driver thread per play owns setup and cleanup. It spawns the player,
//! which walks the arrangement step by step: every step runs a worker per
//! part, a nested player per arrangement and a distributor that turns pulses
//! into step ticks. A step ends when all of its workers have finished.

use super::bus::Bus;
use super::cancel::{CancelOnPanic, CancelToken};
use super::{PlaybackState, State};
use crate::clock::{tick_interval, Clock, TickCallback, TickClock, PPQ};
use crate::error::{Error, PlaybackError};
use crate::midi::{self, InputPort, MidiMessage, OutputPort};
use crate::parser::metadata::{SequenceMetadata, SyncMode};
use crate::sequence::{Arrangement, ArrangementStep, Part, Playable, Sequence};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use crossbeam::select;
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub const ERROR_QUEUE_CAPACITY: usize = 100;

/// Bounded queue of playback failures; the oldest entry is dropped when full
#[derive(Debug, Clone)]
pub struct ErrorQueue {
    sender: Sender<PlaybackError>,
    receiver: Receiver<PlaybackError>,
}

impl ErrorQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    pub fn push(&self, err: PlaybackError) {
        warn!(error = %err, "playback error");
        let mut err = err;
        loop {
            match self.sender.try_send(err) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.receiver.try_recv();
                    err = back;
                }
            }
        }
    }

    pub fn drain(&self) -> Vec<PlaybackError> {
        self.receiver.try_iter().collect()
    }

    pub fn receiver(&self) -> Receiver<PlaybackError> {
        self.receiver.clone()
    }
}

/// Where playback sends notes and transport messages
pub struct Ports {
    pub voice: Arc<dyn OutputPort>,
    /// Transport out, used when leading
    pub sync_out: Option<Arc<dyn OutputPort>>,
    /// Transport in, used when following
    pub sync_in: Option<Arc<dyn InputPort>>,
}

impl Ports {
    pub fn voice_only(voice: Arc<dyn OutputPort>) -> Self {
        Self {
            voice,
            sync_out: None,
            sync_in: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Config {
    bpm: f64,
    looping: bool,
    sync: SyncMode,
}

pub(super) struct Engine {
    config: Mutex<Config>,
    playable: Mutex<Option<Playable>>,
    pub(super) state: State,
    voice: Arc<dyn OutputPort>,
    sync_out: Option<Arc<dyn OutputPort>>,
    pub(super) sync_in: Option<Arc<dyn InputPort>>,
    clock: Mutex<Box<dyn Clock>>,
    pub(super) play_bus: Bus,
    pub(super) stop_bus: Bus,
    stopped_bus: Bus,
    pub(super) pulse_bus: Arc<Bus>,
    cancel: Mutex<Option<CancelToken>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    errors: ErrorQueue,
    keys: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to the playback engine
#[derive(Clone)]
pub struct PlaybackEngine {
    pub(super) inner: Arc<Engine>,
}

impl PlaybackEngine {
    pub fn new(ports: Ports) -> Self {
        Self::with_clock(ports, Box::new(TickClock::new(120.0)))
    }

    /// Uses `clock` for internal pulses instead of a [`TickClock`]
    pub fn with_clock(ports: Ports, clock: Box<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Engine {
                config: Mutex::new(Config {
                    bpm: 120.0,
                    looping: false,
                    sync: SyncMode::None,
                }),
                playable: Mutex::new(None),
                state: State::default(),
                voice: ports.voice,
                sync_out: ports.sync_out,
                sync_in: ports.sync_in,
                clock: Mutex::new(clock),
                play_bus: Bus::new(),
                stop_bus: Bus::new(),
                stopped_bus: Bus::new(),
                pulse_bus: Arc::new(Bus::new()),
                cancel: Mutex::new(None),
                driver: Mutex::new(None),
                errors: ErrorQueue::new(ERROR_QUEUE_CAPACITY),
                keys: AtomicU64::new(0),
            }),
        }
    }

    /// Applies tempo, loop and sync settings; takes effect on the next play
    pub fn configure(&self, meta: &SequenceMetadata) {
        {
            let mut config = lock(&self.inner.config);
            config.bpm = meta.bpm;
            config.looping = meta.looping;
            config.sync = meta.sync;
        }
        if let Err(e) = lock(&self.inner.clock).set_tempo(meta.bpm) {
            self.inner.errors.push(e.into());
        }
        debug!(bpm = meta.bpm, looping = meta.looping, sync = %meta.sync, "configured playback");
    }

    pub fn set_playable(&self, playable: Playable) {
        *lock(&self.inner.playable) = Some(playable);
    }

    pub fn playable(&self) -> Option<Playable> {
        lock(&self.inner.playable).clone()
    }

    /// Starts the current playable; ignored while already playing
    pub fn start_playback(&self) {
        let Some(playable) = self.playable() else {
            warn!("nothing selected to play");
            return;
        };
        let token = CancelToken::new();
        {
            // stop() must never see playing with the previous token
            let mut cancel = lock(&self.inner.cancel);
            if !self.inner.state.play() {
                return;
            }
            *cancel = Some(token.clone());
        }

        // a finished driver is only joined here or by wait
        let previous = lock(&self.inner.driver).take();
        if let Some(previous) = previous {
            let _ = previous.join();
        }

        let engine = Arc::clone(&self.inner);
        let arrangement = playable.to_arrangement();
        let spawned = thread::Builder::new()
            .name("playback-driver".to_string())
            .spawn(move || engine.drive(arrangement, token));

        match spawned {
            Ok(handle) => *lock(&self.inner.driver) = Some(handle),
            Err(e) => {
                self.inner.state.stop();
                self.inner.errors.push(PlaybackError::Panic(e.to_string()));
            }
        }
    }

    /// Cancels playback; cleanup runs on the driver thread
    pub fn stop(&self) {
        if self.inner.state.is_playing() {
            if let Some(token) = lock(&self.inner.cancel).as_ref() {
                token.cancel();
            }
        }
    }

    /// Cancels playback and returns once cleanup has finished
    pub fn stop_and_wait(&self) {
        self.stop();
        self.wait();
    }

    /// Blocks until the current play finishes on its own or is stopped
    pub fn wait(&self) {
        let handle = lock(&self.inner.driver).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Stops playback, then parses `document` and applies its settings.
    /// On error the engine is left stopped with its previous configuration.
    pub fn reload(&self, document: &str) -> Result<Sequence, Error> {
        self.stop_and_wait();
        let sequence = Sequence::parse(document)?;
        self.configure(sequence.metadata());
        sequence.clear_cursors();
        info!(playables = sequence.playables().len(), "reloaded sequence");
        Ok(sequence)
    }

    /// Routes play and stop bus signals to this engine
    pub fn listen(&self) -> Result<(), PlaybackError> {
        let (play_tx, play_rx) = bounded::<()>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.inner.play_bus.sub("engine", play_tx);
        self.inner.stop_bus.sub("engine", stop_tx);

        let spawn = |name: &str, rx: Receiver<()>, on_signal: fn(&PlaybackEngine)| {
            let weak: Weak<Engine> = Arc::downgrade(&self.inner);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    while rx.recv().is_ok() {
                        let Some(inner) = weak.upgrade() else { break };
                        on_signal(&PlaybackEngine { inner });
                    }
                })
                .map(|_| ())
                .map_err(|e| PlaybackError::Panic(e.to_string()))
        };

        spawn("play-listener", play_rx, PlaybackEngine::start_playback)?;
        spawn("stop-listener", stop_rx, PlaybackEngine::stop)
    }

    /// Asks every play subscriber to start
    pub fn request_play(&self) {
        self.inner.play_bus.publish();
    }

    /// Asks every stop subscriber to stop
    pub fn request_stop(&self) {
        self.inner.stop_bus.publish();
    }

    pub fn play_bus(&self) -> &Bus {
        &self.inner.play_bus
    }

    /// Stop requests only
    pub fn stop_bus(&self) -> &Bus {
        &self.inner.stop_bus
    }

    /// Published once a play's cleanup has finished. Kept apart from the
    /// stop bus so the engine never reads its own notice as a new request.
    pub fn stopped_bus(&self) -> &Bus {
        &self.inner.stopped_bus
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.state.get()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.is_playing()
    }

    /// Quarter-note length at the configured tempo
    pub fn beat(&self) -> Duration {
        tick_interval(lock(&self.inner.config).bpm) * PPQ
    }

    pub fn drain_errors(&self) -> Vec<PlaybackError> {
        self.inner.errors.drain()
    }

    pub fn errors(&self) -> Receiver<PlaybackError> {
        self.inner.errors.receiver()
    }
}

/// Everything the player threads share for one play
struct Player<'a> {
    engine: &'a Engine,
    token: CancelToken,
    looping: bool,
}

impl Engine {
    fn drive(&self, arrangement: Arc<Arrangement>, token: CancelToken) {
        let config = lock(&self.config).clone();
        info!(
            name = arrangement.name(),
            bpm = config.bpm,
            sync = %config.sync,
            "playback started"
        );

        let clock_running = match self.start_transport(config.sync) {
            Ok(running) => running,
            Err(e) => {
                self.errors.push(e);
                self.finish(config.sync, false);
                return;
            }
        };

        let player = Player {
            engine: self,
            token: token.clone(),
            looping: config.looping,
        };
        let outcome = thread::scope(|s| {
            thread::Builder::new()
                .name("player".to_string())
                .spawn_scoped(s, || {
                    let _guard = CancelOnPanic(&player.token);
                    player.play(&arrangement, true);
                })
                .map(|handle| handle.join())
        });

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "player panicked");
                self.errors.push(PlaybackError::Panic(message));
            }
            Err(e) => self.errors.push(PlaybackError::Panic(e.to_string())),
        }

        token.cancel();
        self.finish(config.sync, clock_running);
    }

    /// Leader sends Start before the first pulse; follower waits for pulses
    /// from the transport listener
    fn start_transport(&self, sync: SyncMode) -> Result<bool, PlaybackError> {
        let pulses = Arc::clone(&self.pulse_bus);
        let on_tick: TickCallback = match sync {
            SyncMode::Follower => return Ok(false),
            SyncMode::None => Box::new(move || pulses.publish()),
            SyncMode::Leader => {
                self.send_sync(MidiMessage::Start);
                let sync_out = self.sync_out.clone();
                let errors = self.errors.clone();
                let clock_bytes = MidiMessage::TimingClock.to_bytes();
                Box::new(move || {
                    pulses.publish();
                    if let Some(port) = &sync_out {
                        if let Err(e) = port.send(&clock_bytes) {
                            errors.push(e.into());
                        }
                    }
                })
            }
        };

        lock(&self.clock).start(on_tick)?;
        Ok(true)
    }

    /// Cleanup shared by every exit path
    fn finish(&self, sync: SyncMode, clock_running: bool) {
        if clock_running {
            if let Err(e) = lock(&self.clock).stop() {
                self.errors.push(PlaybackError::Clock(e));
            }
        }

        for message in midi::silence_all() {
            self.send_voice(&message);
        }
        if sync == SyncMode::Leader {
            self.send_sync(MidiMessage::Stop);
        }

        self.state.stop();
        self.stopped_bus.publish();
        info!("playback stopped");
    }

    fn send_voice(&self, message: &MidiMessage) {
        trace!(message = %message, "send");
        if let Err(e) = self.voice.send(&message.to_bytes()) {
            self.errors.push(e.into());
        }
    }

    fn send_sync(&self, message: MidiMessage) {
        if let Some(port) = &self.sync_out {
            if let Err(e) = port.send(&message.to_bytes()) {
                self.errors.push(e.into());
            }
        }
    }
}

impl Player<'_> {
    /// Walks `arrangement` with one pulse counter for the whole invocation.
    /// Only the top-level invocation loops.
    fn play(&self, arrangement: &Arrangement, top: bool) {
        let key = format!(
            "{}#{}",
            arrangement.name(),
            self.engine.keys.fetch_add(1, Ordering::Relaxed)
        );
        let (pulse_tx, pulses) = bounded::<()>(1);
        self.engine.pulse_bus.sub(key.as_str(), pulse_tx);
        let _subscription = Unsubscribe {
            bus: &self.engine.pulse_bus,
            key: &key,
        };
        let counter = AtomicUsize::new(0);

        loop {
            let start = counter.load(Ordering::Acquire);
            for (idx, step) in arrangement.step_playables().iter().enumerate() {
                arrangement.cursor().set(idx);
                if self.token.is_cancelled() {
                    return;
                }
                debug!(arrangement = arrangement.name(), step = idx, "step");
                self.play_step(step, &pulses, &counter);
            }

            // an arrangement that consumed no pulses would spin forever
            let idle = counter.load(Ordering::Acquire) == start;
            if !top || !self.looping || self.token.is_cancelled() || idle {
                break;
            }
        }
    }

    fn play_step(&self, step: &ArrangementStep, pulses: &Receiver<()>, counter: &AtomicUsize) {
        let (step_done_tx, step_done) = bounded::<()>(0);

        thread::scope(|s| {
            let mut ticks = Vec::new();
            let mut workers = Vec::new();

            let parts = step
                .playables()
                .iter()
                .filter_map(|p| match p {
                    Playable::Part(part) => Some(part),
                    Playable::Arrangement(_) => None,
                })
                .chain(std::iter::once(step.sync_part()));
            for part in parts {
                let (tick_tx, tick_rx) = bounded::<()>(1);
                ticks.push((&**part, tick_tx));
                workers.push(s.spawn(move || {
                    let _guard = CancelOnPanic(&self.token);
                    self.play_part(part, tick_rx);
                }));
            }

            for playable in step.playables() {
                if let Playable::Arrangement(nested) = playable {
                    workers.push(s.spawn(move || {
                        let _guard = CancelOnPanic(&self.token);
                        self.play(nested, false);
                    }));
                }
            }

            let step_done = &step_done;
            s.spawn(move || self.distribute(ticks, pulses, counter, step_done));

            let mut panic = None;
            for worker in workers {
                if let Err(payload) = worker.join() {
                    panic.get_or_insert(payload);
                }
            }
            drop(step_done_tx);
            if let Some(payload) = panic {
                std::panic::resume_unwind(payload);
            }
        });
    }

    /// Sends each step's offs then ons as ticks arrive
    fn play_part(&self, part: &Part, ticks: Receiver<()>) {
        for (idx, messages) in part.step_midi().iter().enumerate() {
            select! {
                recv(self.token.receiver()) -> _ => return,
                recv(ticks) -> tick => if tick.is_err() { return },
            }
            if self.token.is_cancelled() {
                return;
            }

            part.cursor().set(idx);
            for message in messages.off.iter().chain(&messages.on) {
                self.engine.send_voice(message);
            }
        }
    }

    /// Offers a tick to every part whose division divides the counter and
    /// that still has steps left, then advances the counter
    fn distribute(
        &self,
        ticks: Vec<(&Part, Sender<()>)>,
        pulses: &Receiver<()>,
        counter: &AtomicUsize,
        step_done: &Receiver<()>,
    ) {
        let mut sent = vec![0usize; ticks.len()];
        loop {
            select! {
                recv(self.token.receiver()) -> _ => return,
                recv(step_done) -> _ => return,
                recv(pulses) -> pulse => {
                    if pulse.is_err() {
                        return;
                    }
                    let current = counter.load(Ordering::Acquire);
                    for (i, (part, tick)) in ticks.iter().enumerate() {
                        let division = part.division().max(1) as usize;
                        if current % division != 0 || sent[i] >= part.len() {
                            continue;
                        }
                        match tick.try_send(()) {
                            Ok(()) => sent[i] += 1,
                            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => {}
                        }
                    }
                    counter.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }
}

struct Unsubscribe<'a> {
    bus: &'a Bus,
    key: &'a str,
}

impl Drop for Unsubscribe<'_> {
    fn drop(&mut self) {
        self.bus.unsub(self.key);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
