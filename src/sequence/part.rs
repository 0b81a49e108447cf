//! A single voice: one MIDI channel stepping at a fixed division

use super::arrangement::{Arrangement, ArrangementLine};
use super::step::Step;
use super::{format_duration, step_listing, Cursor, Playable};
use crate::clock::PPQ;
use crate::error::ParseError;
use crate::midi::MidiMessage;
use crate::parser::metadata::PartMetadata;
use crate::parser::step;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const VELOCITY: u8 = 100;

/// Messages sent when a step starts; offs go out before ons
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMidi {
    pub on: Vec<MidiMessage>,
    pub off: Vec<MidiMessage>,
}

#[derive(Debug)]
pub struct Part {
    name: String,
    group: String,
    channel: u8,
    division: u32,
    steps: Vec<String>,
    step_midi: Vec<StepMidi>,
    /// Note-offs keyed by pulse offset from the start of the part
    offs: BTreeMap<usize, Vec<MidiMessage>>,
    duration: Duration,
    cursor: Cursor,
    warnings: Vec<String>,
}

impl Part {
    /// Builds a part from its step lines, expanding `*N` repeats
    pub fn parse(meta: PartMetadata, lines: &[String], bpm: f64) -> Result<Self, ParseError> {
        let mut steps = Vec::new();
        let mut contents = Vec::new();

        for line in lines {
            let step = Step::new(line.as_str());
            let repeat = step.repeat()?;
            let nodes = step::parse(line)?;

            for position in 1..=repeat.times {
                steps.push(if position == 1 { line.clone() } else { String::new() });
                contents.push(if repeat.sounds(position) { nodes.clone() } else { Vec::new() });
            }
        }

        let channel = meta.channel.saturating_sub(1);
        let division = meta.division as usize;
        let total_ticks = steps.len() * division;
        let mut step_midi = vec![StepMidi::default(); steps.len()];
        let mut offs: BTreeMap<usize, Vec<MidiMessage>> = BTreeMap::new();

        for (idx, nodes) in contents.iter().enumerate() {
            for node in nodes.iter() {
                for note in node.pitches()? {
                    step_midi[idx].on.push(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity: VELOCITY,
                    });

                    // one tick before the step that follows the hold
                    let Some(hold) = node.duration().filter(|d| *d > 0) else {
                        continue;
                    };
                    let tick = (idx + hold as usize) * division - 1;
                    if tick < total_ticks {
                        offs.entry(tick)
                            .or_default()
                            .push(MidiMessage::NoteOff { channel, note });
                    }
                }
            }
        }

        Ok(Self {
            duration: ticks_duration(total_ticks, bpm),
            name: meta.name,
            group: meta.group,
            channel: meta.channel,
            division: meta.division,
            steps,
            step_midi,
            offs,
            cursor: Cursor::default(),
            warnings: meta.warnings,
        })
    }

    /// A division-1 part `length` pulses long that only sends the given
    /// note-offs, used to release notes between regular step boundaries
    pub fn sync(length: usize, offs: &BTreeMap<usize, Vec<MidiMessage>>) -> Self {
        let mut step_midi = vec![StepMidi::default(); length];
        for (tick, messages) in offs.range(..length) {
            step_midi[*tick].off.extend_from_slice(messages);
        }

        Self {
            name: "sync".to_string(),
            group: String::new(),
            channel: 1,
            division: 1,
            steps: vec![String::new(); length],
            step_midi,
            offs: BTreeMap::new(),
            duration: Duration::ZERO,
            cursor: Cursor::default(),
            warnings: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// 1-based MIDI channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Pulses per step
    pub fn division(&self) -> u32 {
        self.division
    }

    pub fn len(&self) -> usize {
        self.step_midi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_midi.is_empty()
    }

    pub fn step_midi(&self) -> &[StepMidi] {
        &self.step_midi
    }

    pub fn offs(&self) -> &BTreeMap<usize, Vec<MidiMessage>> {
        &self.offs
    }

    /// Pulses needed to play every step
    pub fn tick_length(&self) -> usize {
        self.len() * self.division as usize
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn title(&self) -> String {
        format!(
            "{} (ch:{}) ({})",
            self.name,
            self.channel,
            format_duration(self.duration)
        )
    }

    pub fn steps(&self) -> String {
        step_listing(&self.steps, self.cursor.get())
    }

    /// Wraps this part as a one-step arrangement so it can be played alone
    pub fn to_arrangement(self: &Arc<Self>) -> Arrangement {
        let line = ArrangementLine {
            text: self.name.clone(),
            repeat: Default::default(),
            playables: vec![Playable::Part(Arc::clone(self))],
        };
        Arrangement::new(self.name.clone(), self.group.clone(), vec![line], Vec::new())
    }
}

/// Wall time of `ticks` pulses at `bpm`
pub(crate) fn ticks_duration(ticks: usize, bpm: f64) -> Duration {
    let beats = ticks as f64 / PPQ as f64;
    Duration::from_secs_f64(beats * 60.0 / bpm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::metadata::Metadata;

    fn part(header: &str, lines: &[&str]) -> Part {
        let meta = PartMetadata::from_metadata(&Metadata::parse(header).unwrap()).unwrap();
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        Part::parse(meta, &lines, 120.0).unwrap()
    }

    fn on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: VELOCITY,
        }
    }

    #[test]
    fn test_step_midi_matches_expanded_length() {
        let p = part(".part", &["c5", "", "e5 *3", "g5"]);
        assert_eq!(p.len(), 6);
        assert_eq!(p.steps.len(), p.step_midi().len());
        assert_eq!(p.step_midi()[0].on, vec![on(60)]);
        assert!(p.step_midi()[1].on.is_empty());
        for idx in 2..5 {
            assert_eq!(p.step_midi()[idx].on, vec![on(64)]);
        }
        assert_eq!(p.step_midi()[5].on, vec![on(67)]);
    }

    #[test]
    fn test_only_first_copy_keeps_text() {
        let p = part(".part", &["c5 *3"]);
        assert_eq!(p.steps, vec!["c5 *3", "", ""]);
    }

    #[test]
    fn test_modulo_positions_are_rests() {
        let p = part(".part", &["c5 *4%2"]);
        let sounding: Vec<bool> = p.step_midi().iter().map(|s| !s.on.is_empty()).collect();
        assert_eq!(sounding, vec![false, true, false, true]);
    }

    #[test]
    fn test_off_one_tick_early() {
        let p = part(".part", &["c5:1", "e5:2", "", ""]);
        assert_eq!(
            p.offs().get(&23),
            Some(&vec![MidiMessage::NoteOff { channel: 0, note: 60 }])
        );
        // second step held for two steps ends at 3 * 24 - 1
        assert_eq!(
            p.offs().get(&71),
            Some(&vec![MidiMessage::NoteOff { channel: 0, note: 64 }])
        );
    }

    #[test]
    fn test_each_repeat_schedules_its_off() {
        let p = part(".part div:8th", &["c5:1 *3"]);
        let ticks: Vec<usize> = p.offs().keys().copied().collect();
        assert_eq!(ticks, vec![11, 23, 35]);
    }

    #[test]
    fn test_ringing_and_overlong_notes_get_no_off() {
        let p = part(".part", &["c5", "e5:4"]);
        assert!(p.offs().is_empty());
    }

    #[test]
    fn test_chord_ons_on_channel() {
        let p = part(".part ch:3", &["C:1"]);
        let notes: Vec<u8> = p.step_midi()[0]
            .on
            .iter()
            .map(|m| match m {
                MidiMessage::NoteOn { channel, note, .. } => {
                    assert_eq!(*channel, 2);
                    *note
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(notes, vec![60, 64, 67]);
        assert_eq!(p.offs().get(&23).map(Vec::len), Some(3));
    }

    #[test]
    fn test_duration_and_title() {
        // 8 eighth notes at 120 bpm is two seconds
        let p = part(".part name:lead ch:2 div:8th", &["c5 *8"]);
        assert_eq!(p.duration(), Duration::from_secs(2));
        assert_eq!(p.title(), "lead (ch:2) (2s)");
        assert_eq!(p.tick_length(), 96);
    }

    #[test]
    fn test_sync_part_carries_offs() {
        let p = part(".part", &["c5:1", "e5:1"]);
        let sync = Part::sync(48, p.offs());
        assert_eq!(sync.division(), 1);
        assert_eq!(sync.len(), 48);
        assert_eq!(sync.step_midi()[23].off.len(), 1);
        assert_eq!(sync.step_midi()[47].off.len(), 1);
        assert!(sync.step_midi().iter().all(|s| s.on.is_empty()));
    }

    #[test]
    fn test_zero_multiplier_is_an_error() {
        let meta = PartMetadata::from_metadata(&Metadata::parse(".part").unwrap()).unwrap();
        assert!(matches!(
            Part::parse(meta, &["c5 *0".to_string()], 120.0),
            Err(ParseError::ZeroMultiplier(_))
        ));
    }
}
