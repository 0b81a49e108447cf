//! Pattern generators for `.func.<name>` blocks
//!
//! A generator turns block metadata into step text, which is then parsed like
//! any hand-written part.

pub mod arpeggiate;
pub mod euclidean;

pub use arpeggiate::Arpeggiate;
pub use euclidean::Euclidean;

use crate::error::GeneratorError;
use crate::parser::metadata::Metadata;

pub trait Generator {
    fn generate(&self) -> Result<Vec<String>, GeneratorError>;
}

/// Builds the named generator from its block metadata
pub fn from_metadata(name: &str, meta: &Metadata) -> Result<Box<dyn Generator>, GeneratorError> {
    match name {
        "euclidean" => Ok(Box::new(Euclidean::from_metadata(meta)?)),
        "arpeggiate" => Ok(Box::new(Arpeggiate::from_metadata(meta)?)),
        _ => Err(GeneratorError::Unknown(name.to_string())),
    }
}

/// Step lines for a `.func.<name>` block
pub fn generate(name: &str, meta: &Metadata) -> Result<Vec<String>, GeneratorError> {
    from_metadata(name, meta)?.generate()
}

/// Comma separated note list, blanks dropped
fn note_pool(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn integer(meta: &Metadata, key: &str) -> Option<i64> {
    meta.number(key).map(|n| n as i64)
}
