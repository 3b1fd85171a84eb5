//! FILENAME: quota-cells/src/lib.rs
//! Quota cell bookkeeping for survey weighting.
//!
//! Respondents are classified into quota cells (one per leaf of a weighting
//! tree). This crate holds the cells and the structures used to query them;
//! it does not know how cells are chosen or weighted.
//!
//! Layers:
//! - `cell` / `populated`: Cell identity, and a cell with its time-sorted responses
//! - `grouped`: Immutable filtered views with weighting-group partitions
//! - `filter` / `enforced`: Query filters and filter-driven cell pruning
//! - `respondents` / `accessor`: Building and querying a subset's respondent index
//! - `cache`: Per-subset compute-once storage

pub mod accessor;
pub mod cache;
pub mod cell;
pub mod enforced;
pub mod error;
pub mod filter;
pub mod grouped;
pub mod populated;
pub mod respondents;
pub mod response;
pub mod subset;

pub use accessor::{CellResponses, ProfileResponseAccessor};
pub use cache::SubsetCache;
pub use cell::{
    QuotaCell, QuotaCellId, WeightingGroupId, UNWEIGHTED_CELL_ID, UNWEIGHTED_CELL_KEY,
};
pub use enforced::EnforcedFilteredGroupedQuotaCells;
pub use error::QuotaCellError;
pub use filter::{AllowedValues, MetricFilter, ResponseFilter};
pub use grouped::GroupedQuotaCells;
pub use populated::PopulatedQuotaCell;
pub use respondents::{RespondentIndex, RespondentRepository, WeightingMethod};
pub use response::{to_ticks, ProfileResponse, ResponseId};
pub use subset::Subset;
