//! FILENAME: weighting-engine/src/config.rs
//! Numeric tolerances and feature switches for the weighting pipeline.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// RIM convergence: largest per-cell weight change still counted as stable.
pub const DEFAULT_POINT_TOLERANCE: f64 = 0.00005;
/// RIM iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Allowed distance of a percentage distribution's sum from 1.
pub const DEFAULT_PERCENTAGE_TOLERANCE: f64 = 0.00001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeightingConfig {
    pub point_tolerance: f64,
    pub max_iterations: u32,
    pub percentage_tolerance: f64,
    /// Enables response-level weighting validation rules and message wording.
    pub response_level_weighting_available: bool,
}

impl Default for WeightingConfig {
    fn default() -> Self {
        WeightingConfig {
            point_tolerance: DEFAULT_POINT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            percentage_tolerance: DEFAULT_PERCENTAGE_TOLERANCE,
            response_level_weighting_available: false,
        }
    }
}

impl WeightingConfig {
    /// Parses a config, taking defaults for any missing field.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
