//! End-to-end playback against in-memory ports and the real tick clock

use beefstep::clock::{Clock, TickCallback};
use beefstep::error::{ClockError, PlaybackError, PortError};
use beefstep::midi::{InputCallback, InputPort, MidiMessage, OutputPort, ALL_NOTES_OFF};
use beefstep::{PlaybackEngine, PlaybackState, Ports, Sequence};
use crossbeam::channel::bounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct RecordingPort {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPort {
    fn messages(&self) -> Vec<MidiMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|bytes| MidiMessage::from_bytes(bytes))
            .collect()
    }
}

impl OutputPort for RecordingPort {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct InjectingPort {
    callback: Mutex<Option<InputCallback>>,
}

impl InjectingPort {
    fn inject(&self, bytes: &[u8]) {
        if let Some(callback) = self.callback.lock().unwrap().as_mut() {
            callback(bytes);
        }
    }
}

impl InputPort for InjectingPort {
    fn listen(&self, callback: InputCallback) -> Result<(), PortError> {
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn stop_listening(&self) {
        self.callback.lock().unwrap().take();
    }
}

fn doc(blocks: &[&str]) -> String {
    blocks
        .iter()
        .map(|b| format!("```beef{b}\n```\n"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn engine_for(document: &str, ports: Ports) -> (PlaybackEngine, Sequence) {
    let sequence = Sequence::parse(document).unwrap();
    let engine = PlaybackEngine::new(ports);
    engine.configure(sequence.metadata());
    engine.set_playable(sequence.default_playable().unwrap());
    (engine, sequence)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn note_ons(messages: &[MidiMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|m| match m {
            MidiMessage::NoteOn { note, .. } => Some(*note),
            _ => None,
        })
        .collect()
}

fn is_silence(message: &MidiMessage) -> bool {
    matches!(
        message,
        MidiMessage::ControlChange { controller, value: 0, .. } if *controller == ALL_NOTES_OFF
    )
}

#[test]
fn test_single_note_plays_and_releases() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:3000", ".part name:a\nc5:1"]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    engine.wait();

    let messages = voice.messages();
    assert_eq!(
        &messages[..2],
        &[
            MidiMessage::NoteOn { channel: 0, note: 60, velocity: 100 },
            MidiMessage::NoteOff { channel: 0, note: 60 },
        ]
    );
    assert_eq!(messages.len(), 18);
    assert!(messages[2..].iter().all(is_silence));
    assert_eq!(engine.state(), PlaybackState::Stopped);
    assert!(engine.drain_errors().is_empty());
}

#[test]
fn test_faster_division_advances_twice_per_quarter() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[
            ".sequence bpm:3000",
            ".part name:slow\nc5\ng5",
            ".part name:fast ch:2 div:8th\nd5\ne5",
            ".arrangement name:both\nslow fast",
        ]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    engine.wait();

    let ons = note_ons(&voice.messages());
    assert_eq!(ons.len(), 4);
    let position = |note: u8| ons.iter().position(|n| *n == note).unwrap();
    // d5 and e5 both fall inside the first quarter, g5 on the second
    assert!(position(60) < position(64));
    assert!(position(62) < position(64));
    assert!(position(64) < position(67));
}

#[test]
fn test_stop_silences_before_stop_event() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:600 loop:true", ".part name:a\nc5 *64"]),
        Ports::voice_only(voice.clone()),
    );
    let (stopped_tx, stopped) = bounded(1);
    engine.stopped_bus().sub("test", stopped_tx);

    engine.start_playback();
    wait_until("first note", || !voice.messages().is_empty());
    engine.stop();

    stopped.recv_timeout(Duration::from_secs(5)).unwrap();
    let messages = voice.messages();
    let tail = &messages[messages.len() - 16..];
    assert!(tail.iter().all(is_silence));

    engine.wait();
    assert_eq!(voice.messages().len(), messages.len());
    assert!(!engine.is_playing());
}

#[test]
fn test_leader_frames_clock_with_start_and_stop() {
    let voice = Arc::new(RecordingPort::default());
    let sync = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:3000 sync:leader", ".part name:a\nc5:1\ne5:1"]),
        Ports {
            voice: voice.clone(),
            sync_out: Some(sync.clone()),
            sync_in: None,
        },
    );

    engine.start_playback();
    engine.wait();

    let messages = sync.messages();
    assert_eq!(messages.first(), Some(&MidiMessage::Start));
    assert_eq!(messages.last(), Some(&MidiMessage::Stop));
    let middle = &messages[1..messages.len() - 1];
    assert!(!middle.is_empty());
    assert!(middle.iter().all(|m| *m == MidiMessage::TimingClock));

    assert!(voice.messages().iter().all(|m| !m.is_transport()));
}

#[test]
fn test_follower_is_driven_by_transport_input() {
    let voice = Arc::new(RecordingPort::default());
    let input = Arc::new(InjectingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence sync:follower", ".part name:a\nc5:1"]),
        Ports {
            voice: voice.clone(),
            sync_out: None,
            sync_in: Some(input.clone()),
        },
    );
    engine.listen().unwrap();
    engine.listen_sync().unwrap();

    // clock before start is ignored
    input.inject(&[0xF8]);
    assert!(!engine.is_playing());

    input.inject(&[0xFA]);
    wait_until("playing", || engine.is_playing());

    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.is_playing() {
        assert!(Instant::now() < deadline, "follower never finished");
        input.inject(&[0xF8]);
        thread::sleep(Duration::from_micros(200));
    }
    engine.wait();

    let messages = voice.messages();
    assert_eq!(note_ons(&messages), vec![60]);
    assert!(messages.contains(&MidiMessage::NoteOff { channel: 0, note: 60 }));
    assert!(messages.iter().all(|m| !m.is_transport()));
}

#[test]
fn test_follower_stops_on_transport_stop() {
    let voice = Arc::new(RecordingPort::default());
    let input = Arc::new(InjectingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence sync:follower loop:true", ".part name:a\nc5 *16"]),
        Ports {
            voice: voice.clone(),
            sync_out: None,
            sync_in: Some(input.clone()),
        },
    );
    engine.listen().unwrap();
    engine.listen_sync().unwrap();

    input.inject(&[0xFA]);
    wait_until("playing", || engine.is_playing());
    input.inject(&[0xFC]);
    wait_until("stopped", || !engine.is_playing());
    engine.wait();

    let messages = voice.messages();
    assert_eq!(messages.len(), 16);
    assert!(messages.iter().all(is_silence));
}

#[test]
fn test_play_is_ignored_while_playing() {
    let voice = Arc::new(RecordingPort::default());
    let sync = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:600 sync:leader", ".part name:a\nc5 *32"]),
        Ports {
            voice: voice.clone(),
            sync_out: Some(sync.clone()),
            sync_in: None,
        },
    );

    engine.start_playback();
    engine.start_playback();
    engine.stop_and_wait();

    let starts = sync
        .messages()
        .iter()
        .filter(|m| **m == MidiMessage::Start)
        .count();
    assert_eq!(starts, 1);
}

#[test]
fn test_bus_requests_route_to_engine() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:600 loop:true", ".part name:a\nc5 *8"]),
        Ports::voice_only(voice.clone()),
    );
    engine.listen().unwrap();

    engine.request_play();
    wait_until("playing", || engine.is_playing());
    engine.request_stop();
    wait_until("stopped", || !engine.is_playing());
    engine.wait();

    assert!(voice.messages().iter().rev().take(16).all(is_silence));
}

#[test]
fn test_reload_stops_playback_first() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:600 loop:true", ".part name:a\nc5 *8"]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    wait_until("first note", || !voice.messages().is_empty());

    let sequence = engine
        .reload(&doc(&[".sequence bpm:90", ".part name:b\nd5"]))
        .unwrap();
    assert!(!engine.is_playing());
    assert!(voice.messages().iter().rev().take(16).all(is_silence));
    assert_eq!(sequence.parts()[0].name(), "b");
    assert_eq!(engine.beat(), Duration::from_secs_f64(60.0 / 90.0 / 24.0) * 24);

    assert!(engine.reload("```beef.part ch:99\nc5\n```\n").is_err());
    assert!(!engine.is_playing());
}

#[test]
fn test_nested_arrangement_plays_inner_parts() {
    let voice = Arc::new(RecordingPort::default());
    let (engine, _) = engine_for(
        &doc(&[
            ".sequence bpm:3000",
            ".arrangement name:song\nverse *2",
            ".arrangement name:verse\na",
            ".part name:a\nc5:1",
        ]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    engine.wait();

    assert_eq!(note_ons(&voice.messages()), vec![60, 60]);
}

#[test]
fn test_quick_restart_after_transport_stop() {
    let voice = Arc::new(RecordingPort::default());
    let input = Arc::new(InjectingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence sync:follower loop:true", ".part name:a\nc5 *16"]),
        Ports {
            voice: voice.clone(),
            sync_out: None,
            sync_in: Some(input.clone()),
        },
    );
    engine.listen().unwrap();
    engine.listen_sync().unwrap();

    for _ in 0..50 {
        input.inject(&[0xFA]);
        wait_until("playing", || engine.is_playing());
        input.inject(&[0xFC]);
        wait_until("stopped", || !engine.is_playing());

        // relocate: start again right after the stop
        input.inject(&[0xFA]);
        wait_until("playing again", || engine.is_playing());
        thread::sleep(Duration::from_millis(5));
        assert!(engine.is_playing(), "restart was cancelled by the previous stop");

        input.inject(&[0xFC]);
        wait_until("stopped", || !engine.is_playing());
    }
    engine.wait();
    assert!(engine.drain_errors().is_empty());
}

/// Clock stepped by hand from the test
#[derive(Clone, Default)]
struct ManualClock {
    on_tick: Arc<Mutex<Option<TickCallback>>>,
}

impl ManualClock {
    fn tick(&self) {
        if let Some(on_tick) = self.on_tick.lock().unwrap().as_mut() {
            on_tick();
        }
    }

    fn is_running(&self) -> bool {
        self.on_tick.lock().unwrap().is_some()
    }
}

impl Clock for ManualClock {
    fn start(&mut self, on_tick: TickCallback) -> Result<(), ClockError> {
        *self.on_tick.lock().unwrap() = Some(on_tick);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ClockError> {
        self.on_tick.lock().unwrap().take();
        Ok(())
    }

    fn set_tempo(&self, _bpm: f64) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Records each message with the index of the pulse that caused it
#[derive(Default)]
struct PulsePort {
    pulse: AtomicUsize,
    sent: Mutex<Vec<(usize, MidiMessage)>>,
}

impl PulsePort {
    /// `(pulse, note, is_on)` sorted, since voices on the same pulse race
    fn notes(&self) -> Vec<(usize, u8, bool)> {
        let mut notes: Vec<(usize, u8, bool)> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(pulse, message)| match message {
                MidiMessage::NoteOn { note, .. } => Some((*pulse, *note, true)),
                MidiMessage::NoteOff { note, .. } => Some((*pulse, *note, false)),
                _ => None,
            })
            .collect();
        notes.sort();
        notes
    }

    fn ons(&self, note: u8) -> Vec<usize> {
        self.notes()
            .into_iter()
            .filter(|(_, n, on)| *n == note && *on)
            .map(|(pulse, _, _)| pulse)
            .collect()
    }
}

impl OutputPort for PulsePort {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        if let Some(message) = MidiMessage::from_bytes(bytes) {
            let pulse = self.pulse.load(Ordering::SeqCst);
            self.sent.lock().unwrap().push((pulse, message));
        }
        Ok(())
    }
}

/// Plays `name` from `document`, stepping the clock up to `pulses` times
/// with a pause after each so every worker handles one pulse at a time
fn play_pulses(document: &str, name: &str, pulses: usize) -> Arc<PulsePort> {
    let port = Arc::new(PulsePort::default());
    let clock = ManualClock::default();
    let sequence = Sequence::parse(document).unwrap();
    let playable = sequence.find(name).cloned().unwrap();

    let engine = PlaybackEngine::with_clock(Ports::voice_only(port.clone()), Box::new(clock.clone()));
    engine.configure(sequence.metadata());
    engine.set_playable(playable.clone());
    engine.start_playback();
    wait_until("player ready", || {
        clock.is_running() && playable.current_step().is_some()
    });

    for pulse in 0..pulses {
        if !engine.is_playing() {
            break;
        }
        port.pulse.store(pulse, Ordering::SeqCst);
        clock.tick();
        thread::sleep(Duration::from_millis(3));
    }
    engine.stop_and_wait();
    port
}

#[test]
fn test_exact_pulses_for_divisions_and_offs() {
    let port = play_pulses(
        &doc(&[
            ".part name:slow\nc5:1\ng5:1",
            ".part name:fast ch:2 div:8th\nd5\ne5\nf5\na5",
            ".arrangement name:both\nslow fast",
        ]),
        "both",
        60,
    );

    assert_eq!(
        port.notes(),
        vec![
            (0, 60, true),
            (0, 62, true),
            (12, 64, true),
            // one pulse before the next quarter
            (23, 60, false),
            (24, 65, true),
            (24, 67, true),
            (36, 69, true),
            (47, 67, false),
        ]
    );
}

#[test]
fn test_pulse_counter_spans_steps_but_not_nested_players() {
    let document = doc(&[
        ".part name:trip div:8th-triplet\nc5\nd5\ne5",
        ".part name:quad div:4th-triplet\ng5",
        ".arrangement name:chain\ntrip\nquad",
        ".arrangement name:nest\ntrip\ninner",
        ".arrangement name:inner\nquad",
    ]);

    // the second step starts on pulse 24, which is not a multiple of 16
    let chain = play_pulses(&document, "chain", 60);
    assert_eq!(chain.ons(60), vec![0]);
    assert_eq!(chain.ons(62), vec![8]);
    assert_eq!(chain.ons(64), vec![16]);
    assert_eq!(chain.ons(67), vec![32]);

    // a nested arrangement counts from zero on its first pulse
    let nest = play_pulses(&document, "nest", 60);
    assert_eq!(nest.ons(64), vec![16]);
    assert_eq!(nest.ons(67), vec![24]);
}

#[test]
fn test_pulse_counter_spans_loop_passes() {
    let port = play_pulses(
        &doc(&[
            ".sequence loop:true",
            ".part name:trip div:8th-triplet\nc5\nd5\ne5",
            ".part name:quad div:4th-triplet\ng5",
            ".arrangement name:both\ntrip quad",
        ]),
        "both",
        48,
    );

    assert_eq!(port.ons(60), vec![0, 24]);
    assert_eq!(port.ons(62), vec![8, 32]);
    // second pass starts on pulse 24; quad waits for 32
    assert_eq!(port.ons(67), vec![0, 32]);
}

/// Fails the first send, records the rest
#[derive(Default)]
struct FlakyPort {
    failed: Mutex<bool>,
    inner: RecordingPort,
}

impl OutputPort for FlakyPort {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        let mut failed = self.failed.lock().unwrap();
        if !*failed {
            *failed = true;
            return Err(PortError::Send("boom".into()));
        }
        self.inner.send(bytes)
    }
}

#[test]
fn test_port_error_is_queued_and_playback_continues() {
    let voice = Arc::new(FlakyPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:3000", ".part name:a\nc5:1\ne5:1"]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    engine.wait();

    assert_eq!(
        engine.drain_errors(),
        vec![PlaybackError::Port(PortError::Send("boom".into()))]
    );
    // the first note on was dropped, everything after still went out
    let messages = voice.inner.messages();
    assert_eq!(note_ons(&messages), vec![64]);
    assert!(messages.contains(&MidiMessage::NoteOff { channel: 0, note: 60 }));
    assert_eq!(messages.iter().filter(|m| is_silence(m)).count(), 16);
    assert_eq!(engine.state(), PlaybackState::Stopped);
}

/// Panics on any note on
#[derive(Default)]
struct ExplodingPort {
    inner: RecordingPort,
}

impl OutputPort for ExplodingPort {
    fn send(&self, bytes: &[u8]) -> Result<(), PortError> {
        if bytes.first().is_some_and(|status| status & 0xF0 == 0x90) {
            panic!("port exploded");
        }
        self.inner.send(bytes)
    }
}

#[test]
fn test_worker_panic_is_reported_and_silenced() {
    let voice = Arc::new(ExplodingPort::default());
    let (engine, _) = engine_for(
        &doc(&[".sequence bpm:600 loop:true", ".part name:a\nc5 *64"]),
        Ports::voice_only(voice.clone()),
    );

    engine.start_playback();
    engine.wait();

    assert_eq!(
        engine.drain_errors(),
        vec![PlaybackError::Panic("port exploded".into())]
    );
    let messages = voice.inner.messages();
    assert_eq!(messages.len(), 16);
    assert!(messages.iter().all(is_silence));
    assert_eq!(engine.state(), PlaybackState::Stopped);
}
