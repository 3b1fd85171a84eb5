//! FILENAME: quota-cells/src/error.rs
//! Error types for quota cell bookkeeping.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuotaCellError {
    #[error("Quota cell not found: {0}")]
    UnknownQuotaCell(String),

    #[error("Quota cell {cell} belongs to subset '{cell_subset}', not '{expected}'")]
    SubsetMismatch {
        cell: String,
        cell_subset: String,
        expected: String,
    },
}

pub type Result<T> = std::result::Result<T, QuotaCellError>;
