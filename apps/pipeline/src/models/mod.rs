pub mod job;
pub mod learning;
pub mod matching;
pub mod resume;
pub mod resume_data;

use thiserror::Error;

/// Raised when a text column holds a value outside a closed enum.
#[derive(Debug, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
