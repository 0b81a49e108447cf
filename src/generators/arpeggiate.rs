//! Cycles a note list, one note per step

use super::{integer, note_pool, Generator};
use crate::error::GeneratorError;
use crate::parser::metadata::Metadata;

const NAME: &str = "arpeggiate";

#[derive(Debug, Clone, PartialEq)]
pub struct Arpeggiate {
    pub notes: Vec<String>,
    pub length: usize,
}

impl Arpeggiate {
    pub fn from_metadata(meta: &Metadata) -> Result<Self, GeneratorError> {
        let notes = meta.text("notes").ok_or(GeneratorError::MissingParam {
            generator: NAME,
            param: "notes",
        })?;
        let length = integer(meta, "length").unwrap_or(1);
        if length < 0 {
            return Err(GeneratorError::NegativeCount);
        }

        Ok(Self {
            notes: note_pool(&notes),
            length: length as usize,
        })
    }
}

impl Generator for Arpeggiate {
    fn generate(&self) -> Result<Vec<String>, GeneratorError> {
        if self.notes.is_empty() {
            return Err(GeneratorError::EmptyPool(NAME));
        }
        Ok(self
            .notes
            .iter()
            .cycle()
            .take(self.length)
            .map(|note| format!("{note}:1"))
            .collect())
    }
}
