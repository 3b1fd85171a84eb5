//! FILENAME: weighting-engine/src/reference.rs
//! Reference weightings: the per-cell weights for a whole subset.
//!
//! The calculator walks the plan list top down over a shrinking set of cells:
//! - no sample in the group: every cell weighted to zero
//! - one plan of plain shares: raked on that single dimension
//! - one plan of populations: sample share plus an expansion factor
//! - one plan whose targets nest: recurse per target, then rescale
//! - several plans: raked together

use crate::config::WeightingConfig;
use crate::definition::{FilterMetricEntityId, WeightingPlan, WeightingTarget};
use crate::error::{Result, WeightingError};
use crate::rim::{RimDimensions, RimWeightingCalculator};
use log::{error, info, warn};
use quota_cells::{GroupedQuotaCells, ProfileResponseAccessor, QuotaCell, QuotaCellId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Raw configuration value meaning "static weight of 1".
pub const STATIC_WEIGHT_SENTINEL: f64 = -1.0;

// ============================================================================
// WEIGHTING VALUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawWeightingValue")]
pub struct WeightingValue {
    /// `None` means the cell is not reweighted: treat as exactly 1.
    weight: Option<f64>,
    is_response_level_weighting: bool,
    expansion_factor: Option<f64>,
}

impl WeightingValue {
    /// Validates a raw weight. `-1` becomes `None`; any other negative (or
    /// NaN) weight is rejected.
    pub fn new(weight: f64, is_response_level_weighting: bool) -> Result<Self> {
        if weight == STATIC_WEIGHT_SENTINEL {
            return Ok(Self::unscaled(is_response_level_weighting));
        }
        if weight.is_nan() || weight < 0.0 {
            return Err(WeightingError::NegativeWeight(weight));
        }
        Ok(Self::computed(weight, is_response_level_weighting))
    }

    pub(crate) fn computed(weight: f64, is_response_level_weighting: bool) -> Self {
        WeightingValue {
            weight: Some(weight),
            is_response_level_weighting,
            expansion_factor: None,
        }
    }

    pub fn unscaled(is_response_level_weighting: bool) -> Self {
        WeightingValue {
            weight: None,
            is_response_level_weighting,
            expansion_factor: None,
        }
    }

    pub fn zero() -> Self {
        Self::computed(0.0, false)
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn is_response_level_weighting(&self) -> bool {
        self.is_response_level_weighting
    }

    pub fn expansion_factor(&self) -> Option<f64> {
        self.expansion_factor
    }

    pub fn with_expansion_factor(mut self, expansion_factor: f64) -> Self {
        self.expansion_factor = Some(expansion_factor);
        self
    }

    fn scaled(mut self, multiplier: f64) -> Self {
        self.weight = self.weight.map(|w| w * multiplier);
        self
    }

    /// Multiplier applied to each respondent of a cell that holds
    /// `sample_share` of its independently weighted group.
    pub fn respondent_scale(&self, sample_share: f64) -> f64 {
        match self.weight {
            None => 1.0,
            Some(weight) if sample_share > 0.0 => weight / sample_share,
            Some(_) => 0.0,
        }
    }
}

/// Wire shape of a `WeightingValue`, checked through `WeightingValue::new`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWeightingValue {
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    is_response_level_weighting: bool,
    #[serde(default)]
    expansion_factor: Option<f64>,
}

impl TryFrom<RawWeightingValue> for WeightingValue {
    type Error = WeightingError;

    fn try_from(raw: RawWeightingValue) -> Result<Self> {
        let value = match raw.weight {
            Some(weight) => WeightingValue::new(weight, raw.is_response_level_weighting)?,
            None => WeightingValue::unscaled(raw.is_response_level_weighting),
        };
        Ok(match raw.expansion_factor {
            Some(expansion_factor) => value.with_expansion_factor(expansion_factor),
            None => value,
        })
    }
}

// ============================================================================
// REFERENCE WEIGHTINGS
// ============================================================================

/// Immutable cell key to weight map for one subset.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCellReferenceWeightings {
    weightings: FxHashMap<String, WeightingValue>,
    total_weighting: f64,
}

impl QuotaCellReferenceWeightings {
    pub fn new(weightings: FxHashMap<String, WeightingValue>) -> Self {
        let total_weighting = weightings.values().filter_map(WeightingValue::weight).sum();
        QuotaCellReferenceWeightings {
            weightings,
            total_weighting,
        }
    }

    pub fn reference_weighting_for(&self, cell: &QuotaCell) -> Result<WeightingValue> {
        self.reference_weighting_for_key(cell.key())
    }

    pub fn reference_weighting_for_key(&self, key: &str) -> Result<WeightingValue> {
        self.weightings
            .get(key)
            .copied()
            .ok_or_else(|| WeightingError::UnknownQuotaCell(key.to_string()))
    }

    /// Sum of every non-null weight.
    pub fn total_weighting(&self) -> f64 {
        self.total_weighting
    }

    pub fn len(&self) -> usize {
        self.weightings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weightings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightingValue)> {
        self.weightings.iter().map(|(key, value)| (key.as_str(), value))
    }
}

// ============================================================================
// CALCULATOR
// ============================================================================

type CellWeightings = Vec<(String, WeightingValue)>;

/// The cells under consideration at one level of the plan tree.
#[derive(Debug, Clone)]
struct NodeParameters {
    parent_cells: Vec<Arc<QuotaCell>>,
    is_root: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceWeightingCalculator {
    rim: RimWeightingCalculator,
    percentage_tolerance: f64,
}

impl Default for ReferenceWeightingCalculator {
    fn default() -> Self {
        Self::new(&WeightingConfig::default())
    }
}

impl ReferenceWeightingCalculator {
    pub fn new(config: &WeightingConfig) -> Self {
        ReferenceWeightingCalculator {
            rim: RimWeightingCalculator::from_config(config),
            percentage_tolerance: config.percentage_tolerance,
        }
    }

    pub fn calculate_reference_weightings(
        &self,
        accessor: &ProfileResponseAccessor,
        weighted_cells: &GroupedQuotaCells,
        plans: &[WeightingPlan],
    ) -> QuotaCellReferenceWeightings {
        let sample_sizes = accessor.sample_sizes(weighted_cells);
        self.calculate_from_sample_sizes(weighted_cells.cells(), &sample_sizes, plans)
    }

    /// Cells absent from `sample_sizes` count as empty.
    pub fn calculate_from_sample_sizes(
        &self,
        cells: &[Arc<QuotaCell>],
        sample_sizes: &FxHashMap<QuotaCellId, f64>,
        plans: &[WeightingPlan],
    ) -> QuotaCellReferenceWeightings {
        let root = NodeParameters {
            parent_cells: cells.to_vec(),
            is_root: true,
        };
        let mut results = CellWeightings::new();
        self.targets_for_group(&root, plans, sample_sizes, &mut results);
        QuotaCellReferenceWeightings::new(results.into_iter().collect())
    }

    fn targets_for_group(
        &self,
        node: &NodeParameters,
        plans: &[WeightingPlan],
        sample_sizes: &FxHashMap<QuotaCellId, f64>,
        out: &mut CellWeightings,
    ) {
        let group: Vec<(Arc<QuotaCell>, f64)> = node
            .parent_cells
            .iter()
            .map(|cell| (Arc::clone(cell), sample_of(sample_sizes, cell)))
            .collect();

        if has_no_sample(node, plans, &group) {
            out.extend(weight_to_zero(&node.parent_cells));
            return;
        }

        let [plan] = plans else {
            out.extend(self.rim_weight_leaf(node, plans, &group));
            return;
        };

        if plan.is_percentage_weighting(self.percentage_tolerance) {
            out.extend(self.rim_weight_leaf(node, plans, &group));
            return;
        }

        let cells_by_entity = cells_by_entity(&node.parent_cells, &plan.filter_metric_name);
        let total_sample: f64 = cells_by_entity
            .values()
            .flatten()
            .map(|cell| sample_of(sample_sizes, cell))
            .sum();

        if plan.is_expansion_weighting_with_no_children() {
            self.expansion_leaf(plan, &cells_by_entity, sample_sizes, total_sample, out);
            return;
        }

        for target in &plan.targets {
            let target_cells = cells_by_entity
                .get(&target.filter_metric_entity_id)
                .cloned()
                .unwrap_or_default();

            if let Some(children) = &target.plans {
                let child_node = NodeParameters {
                    parent_cells: target_cells.clone(),
                    is_root: false,
                };
                let mut results = CellWeightings::new();
                self.targets_for_group(&child_node, children, sample_sizes, &mut results);
                if target.target.is_some() || target.target_population.is_some() {
                    let sample: f64 = target_cells.iter().map(|c| sample_of(sample_sizes, c)).sum();
                    rescale_to_target(target, sample, total_sample, &mut results);
                }
                out.extend(results);
            } else if let Some(goal) = target.target {
                for cell in &target_cells {
                    let value = WeightingValue::new(goal, cell.is_response_level_weighting()).unwrap_or_else(|e| {
                        error!(target: "WEIGHTING", "{} for target {:?}; weighting cell {} to zero", e, target.existing_database_id, cell);
                        WeightingValue::zero()
                    });
                    out.push((cell.key().to_string(), value));
                }
            } else {
                if !target_cells.is_empty() {
                    warn!(
                        target: "WEIGHTING",
                        "target {} of {} has no goal; weighting {} cells to zero",
                        target.filter_metric_entity_id,
                        plan.filter_metric_name,
                        target_cells.len()
                    );
                }
                out.extend(weight_to_zero(&target_cells));
            }
        }
    }

    fn expansion_leaf(
        &self,
        plan: &WeightingPlan,
        cells_by_entity: &FxHashMap<FilterMetricEntityId, Vec<Arc<QuotaCell>>>,
        sample_sizes: &FxHashMap<QuotaCellId, f64>,
        total_sample: f64,
        out: &mut CellWeightings,
    ) {
        for target in &plan.targets {
            let Some(cells) = cells_by_entity.get(&target.filter_metric_entity_id) else {
                continue;
            };
            for cell in cells {
                let sample = sample_of(sample_sizes, cell);
                let value = if sample < 1.0 {
                    WeightingValue::zero()
                } else {
                    let value = WeightingValue::computed(sample / total_sample, false);
                    match target.target_population {
                        Some(population) => value.with_expansion_factor(f64::from(population) / sample),
                        None => value,
                    }
                };
                out.push((cell.key().to_string(), value));
            }
        }
    }

    fn rim_weight_leaf(
        &self,
        node: &NodeParameters,
        plans: &[WeightingPlan],
        group: &[(Arc<QuotaCell>, f64)],
    ) -> CellWeightings {
        let dimensions = rim_dimensions(plans, group);

        if let Some((dimension, _)) = dimensions.iter().find(|(_, targets)| targets.values().sum::<f64>() <= 0.0) {
            let message = format!(
                "total target sample for dimension {} is zero; weighting {} cells to zero",
                dimension,
                group.len()
            );
            if node.is_root {
                info!(target: "RIM", "{}", message);
            } else {
                warn!(target: "RIM", "{}", message);
            }
            let cells: Vec<Arc<QuotaCell>> = group.iter().map(|(cell, _)| Arc::clone(cell)).collect();
            return weight_to_zero(&cells);
        }

        let result = self.rim.calculate(group, &dimensions, true);
        result
            .quota_details
            .unwrap_or_default()
            .into_iter()
            .map(|detail| {
                let value = WeightingValue::computed(detail.target, detail.quota_cell.is_response_level_weighting());
                (detail.quota_cell.key().to_string(), value)
            })
            .collect()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn sample_of(sample_sizes: &FxHashMap<QuotaCellId, f64>, cell: &QuotaCell) -> f64 {
    sample_sizes.get(&cell.id()).copied().unwrap_or(0.0)
}

fn weight_to_zero(cells: &[Arc<QuotaCell>]) -> CellWeightings {
    cells
        .iter()
        .map(|cell| (cell.key().to_string(), WeightingValue::zero()))
        .collect()
}

fn cells_by_entity(cells: &[Arc<QuotaCell>], dimension: &str) -> FxHashMap<FilterMetricEntityId, Vec<Arc<QuotaCell>>> {
    let mut by_entity: FxHashMap<FilterMetricEntityId, Vec<Arc<QuotaCell>>> = FxHashMap::default();
    for cell in cells {
        if let Some(answer) = cell.answer_for(dimension) {
            by_entity.entry(answer).or_default().push(Arc::clone(cell));
        }
    }
    by_entity
}

fn has_no_sample(node: &NodeParameters, plans: &[WeightingPlan], group: &[(Arc<QuotaCell>, f64)]) -> bool {
    let sample: f64 = group.iter().map(|(_, sample)| sample).sum();
    if sample >= 1.0 {
        return false;
    }
    if !node.parent_cells.is_empty() {
        let plan_id = plans.first().and_then(|p| p.existing_database_id).unwrap_or(0);
        if plans.is_empty() && node.is_root {
            info!(
                target: "WEIGHTING",
                "no sample and no plans for {} quota cells; weighting to zero",
                node.parent_cells.len()
            );
        } else if plan_id == 0 {
            warn!(
                target: "WEIGHTING",
                "Sample size was zero for all {} quota cells near plan with id {}. Continuing with zero target weightings.",
                node.parent_cells.len(),
                plan_id
            );
        } else {
            error!(
                target: "WEIGHTING",
                "Sample size was zero for all {} quota cells near plan with id {}. Continuing with zero target weightings.",
                node.parent_cells.len(),
                plan_id
            );
        }
    }
    true
}

/// Applies a nesting target's own goal to the weights computed beneath it.
fn rescale_to_target(target: &WeightingTarget, sample: f64, total_sample: f64, results: &mut CellWeightings) {
    if total_sample <= 0.0 {
        warn!(
            target: "WEIGHTING",
            "Failed to target weight as total sample is {} for target {:?}",
            total_sample,
            target.existing_database_id
        );
        return;
    }
    if sample <= 0.0 {
        warn!(
            target: "WEIGHTING",
            "Failed to target weight as sample is {} for target {:?}",
            sample,
            target.existing_database_id
        );
        return;
    }

    if let Some(goal) = target.target {
        multiply_results_by_target(sample / total_sample, goal, results);
    } else if let Some(population) = target.target_population {
        let expansion_factor = f64::from(population) / sample;
        for (_, value) in results.iter_mut() {
            *value = value.with_expansion_factor(expansion_factor);
        }
    }
}

/// Scales the non-null weights so they sum to `goal`, relative to the
/// target's actual share of its parent's sample.
fn multiply_results_by_target(actual_share: f64, goal: f64, results: &mut CellWeightings) {
    let sum: f64 = results
        .iter()
        .filter_map(|(_, value)| value.weight())
        .filter(|w| *w >= 0.0)
        .sum();
    let multiplier = if sum == 0.0 { 0.0 } else { goal / sum } / actual_share;
    for (_, value) in results.iter_mut() {
        *value = value.scaled(multiplier);
    }
}

/// Absolute target samples per dimension for a RIM group.
///
/// When any target of a dimension has no share, those categories keep their
/// observed sample and the shares of the rest apply to what remains.
pub fn rim_dimensions(plans: &[WeightingPlan], group: &[(Arc<QuotaCell>, f64)]) -> RimDimensions {
    let total: f64 = group.iter().map(|(_, sample)| sample).sum();
    let mut dimensions = RimDimensions::new();

    for plan in plans {
        let categories: Vec<(FilterMetricEntityId, Option<f64>, f64)> = plan
            .targets
            .iter()
            .map(|target| {
                let sample: f64 = group
                    .iter()
                    .filter(|(cell, _)| cell.answer_for(&plan.filter_metric_name) == Some(target.filter_metric_entity_id))
                    .map(|(_, sample)| sample)
                    .sum();
                (target.filter_metric_entity_id, target.target, sample)
            })
            .collect();

        let null_sample: f64 = categories
            .iter()
            .filter(|(_, share, _)| share.is_none())
            .map(|(_, _, sample)| sample)
            .sum();
        let remaining = total - null_sample;

        let targets = categories
            .into_iter()
            .map(|(entity, share, sample)| match share {
                Some(share) => (entity, share * remaining),
                None => (entity, sample),
            })
            .collect();
        dimensions.insert(plan.filter_metric_name.clone(), targets);
    }
    dimensions
}
