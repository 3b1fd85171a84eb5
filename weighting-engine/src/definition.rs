//! FILENAME: weighting-engine/src/definition.rs
//! Weighting plan configuration: WHAT a subset should be weighted to.
//!
//! A plan names one classification dimension and carries a target per answer.
//! Targets either hold a goal directly (a share or an absolute population) or
//! nest further plans that partition their respondents again. Several sibling
//! plans in one list are raked together (RIM).

use crate::error::Result;
use quota_cells::WeightingGroupId;
use serde::{Deserialize, Serialize};

/// The answer value a target applies to.
pub type FilterMetricEntityId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightingPlan {
    pub filter_metric_name: String,
    #[serde(default)]
    pub targets: Vec<WeightingTarget>,
    /// Each target below this plan starts its own weighting group.
    #[serde(default)]
    pub is_weighting_group_root: bool,
    #[serde(default)]
    pub existing_database_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightingTarget {
    pub filter_metric_entity_id: FilterMetricEntityId,
    /// Share of the parent group, `0..=1`. `-1` means a static weight of 1.
    #[serde(default)]
    pub target: Option<f64>,
    /// Absolute population this target's respondents represent.
    #[serde(default)]
    pub target_population: Option<u32>,
    #[serde(default)]
    pub plans: Option<Vec<WeightingPlan>>,
    #[serde(default)]
    pub weighting_group_id: Option<WeightingGroupId>,
    #[serde(default)]
    pub existing_database_id: Option<i32>,
    /// Quota assignments below this target come from an external loader.
    #[serde(default)]
    pub is_response_level: bool,
}

impl WeightingTarget {
    pub fn new(filter_metric_entity_id: FilterMetricEntityId) -> Self {
        WeightingTarget {
            filter_metric_entity_id,
            target: None,
            target_population: None,
            plans: None,
            weighting_group_id: None,
            existing_database_id: None,
            is_response_level: false,
        }
    }

    pub fn percentage(filter_metric_entity_id: FilterMetricEntityId, target: f64) -> Self {
        Self::new(filter_metric_entity_id).with_target(target)
    }

    pub fn population(filter_metric_entity_id: FilterMetricEntityId, population: u32) -> Self {
        Self::new(filter_metric_entity_id).with_population(population)
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_population(mut self, population: u32) -> Self {
        self.target_population = Some(population);
        self
    }

    pub fn with_plans(mut self, plans: Vec<WeightingPlan>) -> Self {
        self.plans = Some(plans);
        self
    }

    pub fn with_database_id(mut self, id: i32) -> Self {
        self.existing_database_id = Some(id);
        self
    }

    pub fn has_child_plans(&self) -> bool {
        self.plans.as_ref().is_some_and(|plans| !plans.is_empty())
    }

    pub fn child_plans(&self) -> &[WeightingPlan] {
        self.plans.as_deref().unwrap_or(&[])
    }
}

impl WeightingPlan {
    pub fn new(filter_metric_name: impl Into<String>, targets: Vec<WeightingTarget>) -> Self {
        WeightingPlan {
            filter_metric_name: filter_metric_name.into(),
            targets,
            is_weighting_group_root: false,
            existing_database_id: None,
        }
    }

    pub fn as_weighting_group_root(mut self) -> Self {
        self.is_weighting_group_root = true;
        self
    }

    pub fn with_database_id(mut self, id: i32) -> Self {
        self.existing_database_id = Some(id);
        self
    }

    /// Parses a persisted plan list and assigns weighting groups.
    pub fn list_from_json_str(json: &str) -> Result<Vec<WeightingPlan>> {
        let mut plans: Vec<WeightingPlan> = serde_json::from_str(json)?;
        assign_weighting_groups(&mut plans);
        Ok(plans)
    }

    pub fn target_for(&self, entity_id: FilterMetricEntityId) -> Option<&WeightingTarget> {
        self.targets
            .iter()
            .find(|t| t.filter_metric_entity_id == entity_id)
    }

    pub fn has_child_plans(&self) -> bool {
        self.targets.iter().any(WeightingTarget::has_child_plans)
    }

    /// Every target is a non-negative share, none nest, and the shares sum
    /// to 1 within `tolerance`.
    pub fn is_percentage_weighting(&self, tolerance: f64) -> bool {
        if self.targets.is_empty() || self.has_child_plans() {
            return false;
        }
        let mut sum = 0.0;
        for target in &self.targets {
            match target.target {
                Some(share) if share >= 0.0 => sum += share,
                _ => return false,
            }
        }
        (sum - 1.0).abs() <= tolerance
    }

    /// Every target is an absolute population and none nest.
    pub fn is_expansion_weighting_with_no_children(&self) -> bool {
        !self.targets.is_empty()
            && self
                .targets
                .iter()
                .all(|t| t.target_population.is_some() && !t.has_child_plans())
    }
}

// ============================================================================
// WEIGHTING GROUPS
// ============================================================================

/// Assigns `weighting_group_id` to every leaf target.
///
/// A list of more than one sibling plan forms one group. Below a plan marked
/// `is_weighting_group_root` each target opens a fresh group unless one is
/// already open. Targets with child plans carry no group themselves.
pub fn assign_weighting_groups(plans: &mut [WeightingPlan]) {
    let mut last_id = 0;
    assign_groups(plans, None, &mut last_id);
}

fn assign_groups(plans: &mut [WeightingPlan], group_id: Option<WeightingGroupId>, last_id: &mut WeightingGroupId) {
    let mut group_id = group_id;
    if plans.len() > 1 && group_id.is_none() {
        *last_id += 1;
        group_id = Some(*last_id);
    }

    for plan in plans.iter_mut() {
        let is_group_root = plan.is_weighting_group_root;
        for target in plan.targets.iter_mut() {
            let mut child_group_id = group_id;
            if is_group_root && child_group_id.is_none() {
                *last_id += 1;
                child_group_id = Some(*last_id);
            }

            if let Some(children) = target.plans.as_mut() {
                assign_groups(children, child_group_id, last_id);
            }
            target.weighting_group_id = if target.has_child_plans() {
                None
            } else {
                child_group_id
            };
        }
    }
}
