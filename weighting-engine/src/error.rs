//! FILENAME: weighting-engine/src/error.rs
//! Error types for weighting configuration and lookups.

use quota_cells::QuotaCellError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeightingError {
    #[error("No reference weighting for quota cell: {0}")]
    UnknownQuotaCell(String),

    #[error("No weightings configured for subset: {0}")]
    NoWeightingsForSubset(String),

    #[error("Unknown subset: {0}")]
    UnknownSubset(String),

    #[error("Weight {0} is not valid: only -1 (static weight of 1) may be negative")]
    NegativeWeight(f64),

    #[error("Invalid weighting configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    QuotaCell(#[from] QuotaCellError),
}

pub type Result<T> = std::result::Result<T, WeightingError>;
