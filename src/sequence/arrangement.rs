//! Arrangements: steps of parts and nested arrangements played together

use super::part::Part;
use super::step::Repeat;
use super::{format_duration, step_listing, Cursor, Playable};
use crate::midi::MidiMessage;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One authored arrangement line with its references resolved
#[derive(Debug, Clone)]
pub struct ArrangementLine {
    pub text: String,
    pub repeat: Repeat,
    pub playables: Vec<Playable>,
}

/// The voices of one materialized step plus the sync part that paces it
#[derive(Debug, Clone)]
pub struct ArrangementStep {
    playables: Vec<Playable>,
    sync: Arc<Part>,
}

impl ArrangementStep {
    /// The sync part is as long as the longest part and carries every part's
    /// deferred note-offs
    pub fn new(playables: Vec<Playable>) -> Self {
        let parts = || {
            playables.iter().filter_map(|p| match p {
                Playable::Part(part) => Some(part),
                Playable::Arrangement(_) => None,
            })
        };

        let length = parts().map(|p| p.tick_length()).max().unwrap_or(0);
        let mut offs: BTreeMap<usize, Vec<MidiMessage>> = BTreeMap::new();
        for part in parts() {
            for (tick, messages) in part.offs() {
                offs.entry(*tick).or_default().extend_from_slice(messages);
            }
        }

        let sync = Arc::new(Part::sync(length, &offs));
        Self { playables, sync }
    }

    /// A silent step lasting as long as this one
    pub fn rest(&self) -> Self {
        Self {
            playables: Vec::new(),
            sync: Arc::new(Part::sync(self.sync.len(), &BTreeMap::new())),
        }
    }

    pub fn playables(&self) -> &[Playable] {
        &self.playables
    }

    pub fn sync_part(&self) -> &Arc<Part> {
        &self.sync
    }

    fn duration(&self) -> Duration {
        self.playables
            .iter()
            .map(Playable::duration)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug)]
pub struct Arrangement {
    name: String,
    group: String,
    steps: Vec<String>,
    step_playables: Vec<ArrangementStep>,
    duration: Duration,
    cursor: Cursor,
    warnings: Vec<String>,
}

impl Arrangement {
    /// Expands each line's repeat; copies that do not sound become rests
    pub fn new(
        name: String,
        group: String,
        lines: Vec<ArrangementLine>,
        warnings: Vec<String>,
    ) -> Self {
        let mut steps = Vec::new();
        let mut step_playables = Vec::new();

        for line in lines {
            let step = ArrangementStep::new(line.playables);
            for position in 1..=line.repeat.times {
                steps.push(if position == 1 { line.text.clone() } else { String::new() });
                step_playables.push(if line.repeat.sounds(position) {
                    step.clone()
                } else {
                    step.rest()
                });
            }
        }

        let duration = step_playables.iter().map(ArrangementStep::duration).sum();

        Self {
            name,
            group,
            steps,
            step_playables,
            duration,
            cursor: Cursor::default(),
            warnings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn step_playables(&self) -> &[ArrangementStep] {
        &self.step_playables
    }

    pub fn len(&self) -> usize {
        self.step_playables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_playables.is_empty()
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
        format!("{} ({})", self.name, format_duration(self.duration))
    }

    pub fn steps(&self) -> String {
        step_listing(&self.steps, self.cursor.get())
    }
}
