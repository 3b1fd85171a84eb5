//! FILENAME: weighting-engine/src/rim.rs
//! RIM weighting (iterative proportional fitting) for one leaf group.
//!
//! Each dimension maps answer values to an absolute target sample. Cells are
//! raked dimension by dimension until no cell's weight moves by more than the
//! point tolerance, or the iteration cap is passed.

use crate::config::{WeightingConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_POINT_TOLERANCE};
use indexmap::IndexMap;
use log::warn;
use quota_cells::QuotaCell;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;

/// Dimension name to (answer value to target sample).
pub type RimDimensions = IndexMap<String, IndexMap<i32, f64>>;

pub const DISTRIBUTION_BUCKET_FACTOR: f64 = 0.1;
pub const DISTRIBUTION_BUCKETS: usize = 50;

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaWeightingDetails {
    #[serde(skip)]
    pub quota_cell: Arc<QuotaCell>,
    pub sample_size: f64,
    /// Per-respondent multiplier. 1 for empty cells.
    pub scale_factor: f64,
    /// The cell's weighted share of the group.
    pub target: f64,
}

/// Respondent counts bucketed by weight, `bucket_factor` wide per bucket.
/// The last bucket collects everything above the range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsDistribution {
    pub bucket_factor: f64,
    pub buckets: Vec<u64>,
}

impl Default for WeightsDistribution {
    fn default() -> Self {
        WeightsDistribution {
            bucket_factor: DISTRIBUTION_BUCKET_FACTOR,
            buckets: vec![0; DISTRIBUTION_BUCKETS],
        }
    }
}

impl WeightsDistribution {
    fn add(&mut self, weight: f64, respondents: f64) {
        let last = self.buckets.len() - 1;
        let bucket = ((weight / self.bucket_factor).max(0.0) as usize).min(last);
        self.buckets[bucket] += respondents as u64;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RimWeightingCalculationResult {
    pub min_weight: f64,
    pub max_weight: f64,
    /// Weighting efficiency in `0..=1`.
    pub efficiency: f64,
    pub converged: bool,
    pub iterations_performed: u32,
    /// Present when details were requested.
    pub quota_details: Option<Vec<QuotaWeightingDetails>>,
    /// Present when details were not requested.
    pub distribution: Option<WeightsDistribution>,
}

// ============================================================================
// CALCULATOR
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RimWeightingCalculator {
    point_tolerance: f64,
    max_iterations: u32,
}

impl Default for RimWeightingCalculator {
    fn default() -> Self {
        RimWeightingCalculator::new(DEFAULT_POINT_TOLERANCE, DEFAULT_MAX_ITERATIONS)
    }
}

impl RimWeightingCalculator {
    pub fn new(point_tolerance: f64, max_iterations: u32) -> Self {
        RimWeightingCalculator {
            point_tolerance,
            max_iterations,
        }
    }

    pub fn from_config(config: &WeightingConfig) -> Self {
        Self::new(config.point_tolerance, config.max_iterations)
    }

    /// Rakes `cells` (each with its observed sample size) to `dimensions`.
    ///
    /// Cells are grouped per dimension by their key part for it; cells without
    /// one are not raked on that dimension. Categories nobody answered are
    /// skipped.
    pub fn calculate(
        &self,
        cells: &[(Arc<QuotaCell>, f64)],
        dimensions: &RimDimensions,
        include_quota_details: bool,
    ) -> RimWeightingCalculationResult {
        if cells.is_empty() {
            return RimWeightingCalculationResult::default();
        }

        let samples: Vec<f64> = cells.iter().map(|(_, sample)| *sample).collect();
        let categories = category_members(cells, dimensions);

        let mut raked = samples.clone();
        let mut weights = vec![1.0; cells.len()];
        let mut converged = false;
        let mut iterations = 0;

        while !converged && iterations <= self.max_iterations {
            for (members, target) in &categories {
                let total: f64 = members.iter().map(|&i| raked[i]).sum();
                if total == 0.0 {
                    continue;
                }
                let factor = target / total;
                for &i in members {
                    raked[i] *= factor;
                }
            }

            let next: Vec<f64> = samples
                .iter()
                .zip(&raked)
                .map(|(&sample, &size)| if sample == 0.0 { 1.0 } else { size / sample })
                .collect();
            converged = next
                .iter()
                .zip(&weights)
                .all(|(new, old)| (new - old).abs() <= self.point_tolerance);
            weights = next;
            iterations += 1;
        }

        if !converged {
            warn!(
                target: "RIM",
                "did not converge after {} iterations across {} cells",
                iterations,
                cells.len()
            );
        }

        let min_weight = weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max_weight = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let total_sample: f64 = samples.iter().sum();
        let efficiency = efficiency(&samples, &weights, total_sample);

        let mut result = RimWeightingCalculationResult {
            min_weight,
            max_weight,
            efficiency,
            converged,
            iterations_performed: iterations,
            quota_details: None,
            distribution: None,
        };

        if include_quota_details {
            result.quota_details = Some(
                cells
                    .iter()
                    .zip(&weights)
                    .map(|((cell, sample), &scale_factor)| QuotaWeightingDetails {
                        quota_cell: Arc::clone(cell),
                        sample_size: *sample,
                        scale_factor,
                        target: target_weight(scale_factor, *sample, total_sample),
                    })
                    .collect(),
            );
        } else {
            let mut distribution = WeightsDistribution::default();
            for (&weight, &sample) in weights.iter().zip(&samples) {
                distribution.add(weight, sample);
            }
            result.distribution = Some(distribution);
        }

        result
    }
}

/// For every (dimension, answer) target, the positions of the cells holding
/// that answer.
fn category_members(cells: &[(Arc<QuotaCell>, f64)], dimensions: &RimDimensions) -> Vec<(Vec<usize>, f64)> {
    let mut categories = Vec::new();
    for (dimension, targets) in dimensions {
        let mut by_answer: FxHashMap<i32, Vec<usize>> = FxHashMap::default();
        for (i, (cell, _)) in cells.iter().enumerate() {
            if let Some(answer) = cell.answer_for(dimension) {
                by_answer.entry(answer).or_default().push(i);
            }
        }
        for (answer, target) in targets {
            categories.push((by_answer.remove(answer).unwrap_or_default(), *target));
        }
    }
    categories
}

/// Converts a per-respondent scale factor to the cell's share of the group.
pub fn target_weight(scale_factor: f64, sample_size: f64, total_sample: f64) -> f64 {
    if total_sample == 0.0 {
        return 0.0;
    }
    scale_factor * sample_size / total_sample
}

/// Kish efficiency computed from cell totals: `(Σnw)² / N / Σnw²`.
fn efficiency(samples: &[f64], weights: &[f64], total_respondents: f64) -> f64 {
    let sum_of_weights: f64 = samples.iter().zip(weights).map(|(n, w)| n * w).sum();
    let sum_of_squares: f64 = samples.iter().zip(weights).map(|(n, w)| n * w * w).sum();
    if total_respondents == 0.0 || sum_of_squares == 0.0 {
        return 0.0;
    }
    sum_of_weights * sum_of_weights / total_respondents / sum_of_squares
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_cells::Subset;

    fn cell(id: i32, gender: i32, age: i32) -> Arc<QuotaCell> {
        let mut parts = IndexMap::new();
        parts.insert("Gender".to_string(), gender.to_string());
        parts.insert("Age".to_string(), age.to_string());
        Arc::new(QuotaCell::new(id, Subset::new("UK"), parts))
    }

    fn dimensions(total: f64) -> RimDimensions {
        let mut dims = RimDimensions::new();
        dims.insert("Gender".to_string(), [(0, 0.5 * total), (1, 0.5 * total)].into_iter().collect());
        dims.insert("Age".to_string(), [(1, 0.4 * total), (2, 0.6 * total)].into_iter().collect());
        dims
    }

    fn share(details: &[QuotaWeightingDetails], dimension: &str, answer: i32) -> f64 {
        details
            .iter()
            .filter(|d| d.quota_cell.answer_for(dimension) == Some(answer))
            .map(|d| d.target)
            .sum()
    }

    #[test]
    fn test_empty_input() {
        let result = RimWeightingCalculator::default().calculate(&[], &dimensions(0.0), true);
        assert!(!result.converged);
        assert_eq!(result.iterations_performed, 0);
        assert!(result.quota_details.is_none());
    }

    #[test]
    fn test_single_dimension_hits_targets_exactly() {
        let cells = vec![(cell(0, 0, 1), 30.0), (cell(1, 1, 1), 70.0)];
        let mut dims = RimDimensions::new();
        dims.insert("Gender".to_string(), [(0, 50.0), (1, 50.0)].into_iter().collect());

        let result = RimWeightingCalculator::default().calculate(&cells, &dims, true);
        assert!(result.converged);
        let details = result.quota_details.unwrap();
        assert!((details[0].target - 0.5).abs() < 1e-9);
        assert!((details[0].scale_factor - 50.0 / 30.0).abs() < 1e-9);
        assert!((details[1].scale_factor - 50.0 / 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_dimensions_match_both_marginals() {
        let cells = vec![
            (cell(0, 0, 1), 10.0),
            (cell(1, 0, 2), 30.0),
            (cell(2, 1, 1), 40.0),
            (cell(3, 1, 2), 20.0),
        ];
        let result = RimWeightingCalculator::default().calculate(&cells, &dimensions(100.0), true);
        assert!(result.converged);
        assert!(result.iterations_performed <= DEFAULT_MAX_ITERATIONS + 1);

        let details = result.quota_details.unwrap();
        assert!((share(&details, "Gender", 0) - 0.5).abs() < 1e-3);
        assert!((share(&details, "Gender", 1) - 0.5).abs() < 1e-3);
        assert!((share(&details, "Age", 1) - 0.4).abs() < 1e-3);
        assert!((share(&details, "Age", 2) - 0.6).abs() < 1e-3);
        assert!(result.efficiency > 0.0 && result.efficiency <= 1.0);
    }

    #[test]
    fn test_empty_cell_scale_is_one_and_share_zero() {
        let cells = vec![(cell(0, 0, 1), 0.0), (cell(1, 1, 1), 10.0)];
        let mut dims = RimDimensions::new();
        dims.insert("Gender".to_string(), [(0, 5.0), (1, 5.0)].into_iter().collect());

        let details = RimWeightingCalculator::default()
            .calculate(&cells, &dims, true)
            .quota_details
            .unwrap();
        assert_eq!(details[0].scale_factor, 1.0);
        assert_eq!(details[0].target, 0.0);
    }

    #[test]
    fn test_distribution_without_details() {
        let cells = vec![(cell(0, 0, 1), 30.0), (cell(1, 1, 1), 70.0)];
        let mut dims = RimDimensions::new();
        dims.insert("Gender".to_string(), [(0, 50.0), (1, 50.0)].into_iter().collect());

        let result = RimWeightingCalculator::default().calculate(&cells, &dims, false);
        let distribution = result.distribution.unwrap();
        assert_eq!(distribution.buckets.iter().sum::<u64>(), 100);
        assert_eq!(distribution.buckets[16], 30);
        assert_eq!(distribution.buckets[7], 70);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let cells = vec![
            (cell(0, 0, 1), 10.0),
            (cell(1, 0, 2), 30.0),
            (cell(2, 1, 1), 40.0),
            (cell(3, 1, 2), 20.0),
        ];
        let result = RimWeightingCalculator::new(0.0, 0).calculate(&cells, &dimensions(100.0), true);
        assert!(!result.converged);
        assert_eq!(result.iterations_performed, 1);
    }
}
