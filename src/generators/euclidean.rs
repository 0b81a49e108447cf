//! Euclidean rhythms: pulses spread as evenly as possible over steps

use super::{integer, note_pool, Generator};
use crate::error::GeneratorError;
use crate::parser::metadata::Metadata;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NAME: &str = "euclidean";

#[derive(Debug, Clone, PartialEq)]
pub struct Euclidean {
    pub pulses: i64,
    pub steps: i64,
    /// One note, or several to pick from per pulse
    pub notes: Vec<String>,
    pub rotation: i64,
    pub seed: u64,
}

impl Euclidean {
    pub fn from_metadata(meta: &Metadata) -> Result<Self, GeneratorError> {
        let missing = |param| GeneratorError::MissingParam {
            generator: NAME,
            param,
        };

        let pulses = integer(meta, "pulses").ok_or_else(|| missing("pulses"))?;
        let steps = integer(meta, "steps").ok_or_else(|| missing("steps"))?;
        let notes = meta
            .text("note")
            .or_else(|| meta.text("notes"))
            .ok_or_else(|| missing("note"))?;

        Ok(Self {
            pulses,
            steps,
            notes: note_pool(&notes),
            rotation: integer(meta, "rotation").unwrap_or(0),
            seed: integer(meta, "seed").unwrap_or(0) as u64,
        })
    }
}

impl Generator for Euclidean {
    fn generate(&self) -> Result<Vec<String>, GeneratorError> {
        if self.pulses < 0 || self.steps < 0 {
            return Err(GeneratorError::NegativeCount);
        }
        if self.pulses > self.steps {
            return Err(GeneratorError::PulsesExceedSteps {
                pulses: self.pulses,
                steps: self.steps,
            });
        }
        if self.notes.is_empty() {
            return Err(GeneratorError::EmptyPool(NAME));
        }

        let pattern = rotate(&pattern(self.pulses as usize, self.steps as usize), self.rotation);
        let mut rng = StdRng::seed_from_u64(self.seed);

        Ok(pattern
            .into_iter()
            .map(|pulse| {
                if !pulse {
                    return String::new();
                }
                let note = if self.notes.len() > 1 {
                    &self.notes[rng.gen_range(0..self.notes.len())]
                } else {
                    &self.notes[0]
                };
                format!("{note}:1")
            })
            .collect())
    }
}

/// Bresenham bucket fill: a pulse wherever the running sum wraps
fn pattern(pulses: usize, steps: usize) -> Vec<bool> {
    let mut bucket = 0;
    (0..steps)
        .map(|_| {
            bucket += pulses;
            if bucket >= steps {
                bucket -= steps;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Positive amounts rotate right
fn rotate(pattern: &[bool], amount: i64) -> Vec<bool> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let len = pattern.len();
    let shift = amount.rem_euclid(len as i64) as usize;
    let mut rotated = vec![false; len];
    for (i, pulse) in pattern.iter().enumerate() {
        rotated[(i + shift) % len] = *pulse;
    }
    rotated
}
