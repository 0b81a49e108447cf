//! The playable model built from a document
//!
//! Topology is fixed once a document is loaded; only step cursors change
//! while it plays. Reloading builds a new [`Sequence`].

pub mod arrangement;
pub mod part;
pub mod step;

pub use crate::parser::metadata::SyncMode;
pub use arrangement::{Arrangement, ArrangementLine, ArrangementStep};
pub use part::{Part, StepMidi};
pub use step::{Repeat, Step};

use crate::error::Error;
use crate::generators;
use crate::parser::metadata::{ArrangementMetadata, Metadata, PartMetadata, SequenceMetadata};
use crate::parser::{self, Block, Directive};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const NO_STEP: usize = usize::MAX;

/// Index of the step currently playing, shared with the UI
#[derive(Debug)]
pub struct Cursor(AtomicUsize);

impl Default for Cursor {
    fn default() -> Self {
        Self(AtomicUsize::new(NO_STEP))
    }
}

impl Cursor {
    pub fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::Relaxed) {
            NO_STEP => None,
            idx => Some(idx),
        }
    }

    pub fn set(&self, idx: usize) {
        self.0.store(idx, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(NO_STEP, Ordering::Relaxed);
    }
}

/// Anything that can be selected and played
#[derive(Debug, Clone)]
pub enum Playable {
    Part(Arc<Part>),
    Arrangement(Arc<Arrangement>),
}

impl Playable {
    pub fn name(&self) -> &str {
        match self {
            Playable::Part(p) => p.name(),
            Playable::Arrangement(a) => a.name(),
        }
    }

    pub fn group(&self) -> &str {
        match self {
            Playable::Part(p) => p.group(),
            Playable::Arrangement(a) => a.group(),
        }
    }

    pub fn title(&self) -> String {
        match self {
            Playable::Part(p) => p.title(),
            Playable::Arrangement(a) => a.title(),
        }
    }

    /// Step listing with `>` on the current step
    pub fn steps(&self) -> String {
        match self {
            Playable::Part(p) => p.steps(),
            Playable::Arrangement(a) => a.steps(),
        }
    }

    fn cursor(&self) -> &Cursor {
        match self {
            Playable::Part(p) => p.cursor(),
            Playable::Arrangement(a) => a.cursor(),
        }
    }

    pub fn current_step(&self) -> Option<usize> {
        self.cursor().get()
    }

    pub fn set_step(&self, idx: usize) {
        self.cursor().set(idx);
    }

    pub fn clear_step(&self) {
        self.cursor().clear();
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Playable::Part(p) => p.warnings(),
            Playable::Arrangement(a) => a.warnings(),
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Playable::Part(p) => p.duration(),
            Playable::Arrangement(a) => a.duration(),
        }
    }

    /// What the scheduler walks; a part becomes a one-step arrangement
    pub fn to_arrangement(&self) -> Arc<Arrangement> {
        match self {
            Playable::Part(p) => Arc::new(p.to_arrangement()),
            Playable::Arrangement(a) => Arc::clone(a),
        }
    }
}

/// Go-style duration text: `2s`, `1.5s`, `1m30s`
pub(crate) fn format_duration(duration: Duration) -> String {
    fn seconds(secs: f64) -> String {
        let text = format!("{secs:.3}");
        let text = text.trim_end_matches('0').trim_end_matches('.');
        format!("{text}s")
    }

    let total = duration.as_secs_f64();
    if total >= 60.0 {
        let minutes = (total / 60.0).floor();
        format!("{minutes}m{}", seconds(total - minutes * 60.0))
    } else {
        seconds(total)
    }
}

pub(crate) fn step_listing(steps: &[String], current: Option<usize>) -> String {
    let width = steps.len().to_string().len();
    steps
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let marker = if current == Some(i) { ">" } else { " " };
            format!("{marker} {:>width$}  {text}", i + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A loaded document
#[derive(Debug)]
pub struct Sequence {
    metadata: SequenceMetadata,
    parts: Vec<Arc<Part>>,
    arrangements: Vec<Arc<Arrangement>>,
    playables: Vec<Playable>,
}

struct PendingArrangement<'a> {
    block: &'a Block,
    meta: ArrangementMetadata,
    order: usize,
}

struct Resolver<'a> {
    parts: &'a [Arc<Part>],
    pending: &'a [PendingArrangement<'a>],
    built: Vec<Option<Arc<Arrangement>>>,
    visiting: Vec<bool>,
}

impl<'a> Resolver<'a> {
    fn build(&mut self, idx: usize) -> Result<Arc<Arrangement>, Error> {
        if let Some(done) = &self.built[idx] {
            return Ok(Arc::clone(done));
        }

        let all: &'a [PendingArrangement<'a>] = self.pending;
        let pending = &all[idx];
        let line = pending.block.line;
        self.visiting[idx] = true;

        let mut lines = Vec::new();
        let mut warnings = Vec::new();
        for text in &pending.block.steps {
            let step = Step::new(text.as_str());
            let repeat = step
                .repeat()
                .map_err(|source| Error::Syntax { line, source })?;

            let mut playables = Vec::new();
            for name in step.names() {
                match self.resolve(name)? {
                    Ok(playable) => playables.push(playable),
                    Err(warning) => warnings.push(warning),
                }
            }

            lines.push(ArrangementLine {
                text: text.clone(),
                repeat,
                playables,
            });
        }

        self.visiting[idx] = false;
        let arrangement = Arc::new(Arrangement::new(
            pending.meta.name.clone(),
            pending.meta.group.clone(),
            lines,
            warnings,
        ));
        debug!(name = arrangement.name(), steps = arrangement.len(), "built arrangement");
        self.built[idx] = Some(Arc::clone(&arrangement));
        Ok(arrangement)
    }

    /// Outer error is fatal, inner error is a reference warning
    fn resolve(&mut self, name: &str) -> Result<Result<Playable, String>, Error> {
        if let Some(part) = self.parts.iter().find(|p| p.name() == name) {
            return Ok(Ok(Playable::Part(Arc::clone(part))));
        }

        let Some(idx) = self.pending.iter().position(|a| a.meta.name == name) else {
            return Ok(Err(format!("unknown reference '{name}'")));
        };
        if self.visiting[idx] {
            return Ok(Err(format!("cyclic reference to '{name}'")));
        }
        Ok(Ok(Playable::Arrangement(self.build(idx)?)))
    }
}

impl Sequence {
    /// Parses every block of `document`. Syntax and generator errors abort
    /// the load; unresolved arrangement references become warnings.
    pub fn parse(document: &str) -> Result<Self, Error> {
        let blocks = parser::blocks(document)?;

        let mut metadata = SequenceMetadata::default();
        for block in blocks.iter().filter(|b| b.directive == Directive::Sequence) {
            metadata = Metadata::parse(&block.header)
                .and_then(|meta| SequenceMetadata::from_metadata(&meta))
                .map_err(|source| Error::Syntax {
                    line: block.line,
                    source,
                })?;
        }

        let mut parts = Vec::new();
        let mut ordered = Vec::new();
        let mut pending = Vec::new();

        for (order, block) in blocks.iter().enumerate() {
            let line = block.line;
            let syntax = |source| Error::Syntax { line, source };

            match &block.directive {
                Directive::Sequence => {}
                Directive::Part => {
                    let meta = Metadata::parse(&block.header).map_err(syntax)?;
                    let part_meta = PartMetadata::from_metadata(&meta).map_err(syntax)?;
                    let part = Part::parse(part_meta, &block.steps, metadata.bpm).map_err(syntax)?;
                    debug!(name = part.name(), steps = part.len(), "parsed part");
                    let part = Arc::new(part);
                    ordered.push((order, Playable::Part(Arc::clone(&part))));
                    parts.push(part);
                }
                Directive::Func(generator) => {
                    let meta = Metadata::parse(&block.header).map_err(syntax)?;
                    let part_meta = PartMetadata::from_metadata(&meta).map_err(syntax)?;
                    let steps = generators::generate(generator, &meta)
                        .map_err(|source| Error::Generator { line, source })?;
                    let part = Part::parse(part_meta, &steps, metadata.bpm).map_err(syntax)?;
                    debug!(name = part.name(), generator = %generator, steps = part.len(), "generated part");
                    let part = Arc::new(part);
                    ordered.push((order, Playable::Part(Arc::clone(&part))));
                    parts.push(part);
                }
                Directive::Arrangement => {
                    let meta = Metadata::parse(&block.header).map_err(syntax)?;
                    pending.push(PendingArrangement {
                        block,
                        meta: ArrangementMetadata::from_metadata(&meta),
                        order,
                    });
                }
            }
        }

        let mut resolver = Resolver {
            parts: &parts,
            pending: &pending,
            built: vec![None; pending.len()],
            visiting: vec![false; pending.len()],
        };
        let mut arrangements = Vec::new();
        for (idx, p) in pending.iter().enumerate() {
            let arrangement = resolver.build(idx)?;
            ordered.push((p.order, Playable::Arrangement(Arc::clone(&arrangement))));
            arrangements.push(arrangement);
        }

        ordered.sort_by_key(|(order, _)| *order);
        let sequence = Self {
            metadata,
            parts,
            arrangements,
            playables: ordered.into_iter().map(|(_, p)| p).collect(),
        };

        for warning in sequence.warnings() {
            warn!("{warning}");
        }
        Ok(sequence)
    }

    pub fn metadata(&self) -> &SequenceMetadata {
        &self.metadata
    }

    pub fn parts(&self) -> &[Arc<Part>] {
        &self.parts
    }

    pub fn arrangements(&self) -> &[Arc<Arrangement>] {
        &self.arrangements
    }

    /// Every part and arrangement in document order
    pub fn playables(&self) -> &[Playable] {
        &self.playables
    }

    pub fn find(&self, name: &str) -> Option<&Playable> {
        self.playables.iter().find(|p| p.name() == name)
    }

    /// First arrangement, else first part
    pub fn default_playable(&self) -> Option<Playable> {
        self.arrangements
            .first()
            .map(|a| Playable::Arrangement(Arc::clone(a)))
            .or_else(|| self.parts.first().map(|p| Playable::Part(Arc::clone(p))))
    }

    /// Warnings of every playable, prefixed with its name
    pub fn warnings(&self) -> Vec<String> {
        self.playables
            .iter()
            .flat_map(|p| p.warnings().iter().map(move |w| format!("{}: {w}", p.name())))
            .collect()
    }

    pub fn clear_cursors(&self) {
        for playable in &self.playables {
            playable.clear_step();
        }
    }
}
