//! FILENAME: weighting-engine/src/lib.rs
//! Survey weighting over quota cells.
//!
//! Plans describe the target population; respondents are classified into
//! quota cells along the plan tree and every cell gets a reference weight.
//!
//! Layers:
//! - `definition` / `config`: Plans and numeric settings (serde)
//! - `tree` / `classification` / `factory`: Respondent to quota cell
//! - `rim`: Iterative proportional fitting over several dimensions
//! - `reference`: Per-cell weights for a whole plan tree
//! - `validator`: Structural checks with display messages
//! - `repository`: Per-subset caching of all of the above

pub mod classification;
pub mod config;
pub mod definition;
pub mod error;
pub mod factory;
pub mod reference;
pub mod repository;
pub mod rim;
pub mod tree;
pub mod validator;

pub use classification::{ClassificationFn, InstanceValueFn, MetricClassification, PrimaryVariable};
pub use config::WeightingConfig;
pub use definition::{assign_weighting_groups, FilterMetricEntityId, WeightingPlan, WeightingTarget};
pub use error::{Result, WeightingError};
pub use factory::{
    QuotaCellAllocationReason, QuotaCellFactory, ResponseLevelAssignments, ResponseLevelQuotaCellLoader,
};
pub use reference::{
    QuotaCellReferenceWeightings, ReferenceWeightingCalculator, WeightingValue, STATIC_WEIGHT_SENTINEL,
};
pub use repository::{ReferenceWeightingRepository, ResponseSource, SharedResponseLevelLoader, SubsetWeightingSetup};
pub use rim::{
    QuotaWeightingDetails, RimDimensions, RimWeightingCalculationResult, RimWeightingCalculator,
    WeightsDistribution,
};
pub use tree::{QuotaCellLeaf, QuotaCellNode, QuotaCellTree};
pub use validator::{
    DateWave, ErrorMessageLevel, ErrorMessageType, InMemoryMetricCatalog, Message, MetricCatalog,
    ReferenceWeightingValidator, ValidationReport, ValidatorOptions, WeightingValidationMessage,
};
