use crate::config::ConfigError;
use crate::enroll::SampleOutcome;
use rollcall_core::{AggregateError, DimensionMismatch, EmbedError, InvalidImage};
use rollcall_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] InvalidImage),
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("only {usable} of {total} samples usable, {required} required")]
    InsufficientSamples {
        usable: usize,
        total: usize,
        required: usize,
        samples: Vec<SampleOutcome>,
    },
}

impl EngineError {
    /// Whether the caller sent something unusable, as opposed to the engine
    /// failing to process a valid request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRequest(_)
                | EngineError::Config(_)
                | EngineError::InvalidImage(_)
                | EngineError::InsufficientSamples { .. }
        )
    }
}
