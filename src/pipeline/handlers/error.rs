use thiserror::Error;

use crate::capabilities::{CapabilityError, StorageError};
use crate::pipeline::structuring::ParseFailure;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Extraction output unparseable: {0}")]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Handler '{expected}' cannot store a '{found}' extraction")]
    PayloadMismatch { expected: String, found: String },
}

impl HandlerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Capability(e) if e.is_timeout())
    }
}
