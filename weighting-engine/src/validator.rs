//! FILENAME: weighting-engine/src/validator.rs
//! Structural checks on a plan tree before it is used for weighting.
//!
//! Rules:
//! - a dimension appears at most once on any root-to-leaf path
//! - shares of a nesting plan sum to 1
//! - a plan mixes no shares with populations, and populations sit at the root
//! - several plans (RIM) only at leaves
//! - wave dimensions have no overlapping wave date ranges
//! - no weighting-group root below another

use crate::config::WeightingConfig;
use crate::definition::{WeightingPlan, WeightingTarget};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

const ROOT_PATH: &str = "Root";

// ============================================================================
// METRIC CATALOG
// ============================================================================

/// One wave of a date-wave dimension, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWave {
    pub wave_id: i32,
    pub min_date: NaiveDate,
    pub max_date: NaiveDate,
}

impl DateWave {
    pub fn new(wave_id: i32, min_date: NaiveDate, max_date: NaiveDate) -> Self {
        DateWave {
            wave_id,
            min_date,
            max_date,
        }
    }

    pub fn overlaps(&self, other: &DateWave) -> bool {
        self.min_date <= other.max_date && other.min_date <= self.max_date
    }
}

/// The metrics a plan may refer to.
pub trait MetricCatalog {
    fn contains_metric(&self, name: &str) -> bool;

    /// Waves in definition order, when `name` is a date-wave dimension.
    fn waves(&self, name: &str) -> Option<&[DateWave]>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricCatalog {
    metrics: FxHashMap<String, Option<Vec<DateWave>>>,
}

impl InMemoryMetricCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metric(&mut self, name: impl Into<String>) {
        self.metrics.insert(name.into(), None);
    }

    pub fn add_wave_metric(&mut self, name: impl Into<String>, waves: Vec<DateWave>) {
        self.metrics.insert(name.into(), Some(waves));
    }
}

impl MetricCatalog for InMemoryMetricCatalog {
    fn contains_metric(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    fn waves(&self, name: &str) -> Option<&[DateWave]> {
        self.metrics.get(name).and_then(|waves| waves.as_deref())
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorMessageLevel {
    Error,
    Warning,
}

impl fmt::Display for ErrorMessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMessageLevel::Error => write!(f, "Error"),
            ErrorMessageLevel::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorMessageType {
    MissingVariable,
    MissingSubtreeForInstance,
    InvalidNestedTarget,
    OverlappingWave,
    QuestionUsedMoreThanOnce,
    QuestionHasNoTargets,
    QuestionNotValid,
    QuestionMarkedAsGrouped,
    EmptyPlan,
    MixedTargetPercentageAndPopulation,
    TargetPopulationOutsideOfRoot,
}

/// One step on the path to a plan: the dimension and the answer taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetValue {
    pub variable_name: String,
    pub instance_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFilterMetric {
    pub name: String,
    pub instance_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationTarget {
    pub entity_id: i32,
    pub target: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightingValidationMessage {
    pub error_level: ErrorMessageLevel,
    pub error_type: ErrorMessageType,
    pub parent_variables: Vec<TargetValue>,
    pub path: String,
    pub filter_metric_name: String,
    pub variable: String,
    pub parent_with_grouping: String,
    pub suspect_metrics: Vec<ValidationFilterMetric>,
    pub instance_ids: Vec<i32>,
    pub targets: Vec<ValidationTarget>,
}

impl WeightingValidationMessage {
    fn new(error_level: ErrorMessageLevel, error_type: ErrorMessageType) -> Self {
        WeightingValidationMessage {
            error_level,
            error_type,
            parent_variables: Vec::new(),
            path: String::new(),
            filter_metric_name: String::new(),
            variable: String::new(),
            parent_with_grouping: String::new(),
            suspect_metrics: Vec::new(),
            instance_ids: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn error(error_type: ErrorMessageType) -> Self {
        Self::new(ErrorMessageLevel::Error, error_type)
    }

    fn at(mut self, parents: &[TargetValue]) -> Self {
        self.parent_variables = parents.to_vec();
        self.path = path_of(parents);
        self
    }

    fn for_metric(mut self, name: &str) -> Self {
        self.filter_metric_name = name.to_string();
        self
    }
}

/// A message rendered for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub path: String,
    pub message_text: String,
    pub error_level: ErrorMessageLevel,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} {}", self.error_level, self.path, self.message_text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub messages: Vec<WeightingValidationMessage>,
}

/// `"Root"`, or `Dimension:answer` pairs joined by commas.
fn path_of(parents: &[TargetValue]) -> String {
    if parents.is_empty() {
        return ROOT_PATH.to_string();
    }
    parents
        .iter()
        .map(|p| format!("{}:{}", p.variable_name, p.instance_id))
        .collect::<Vec<_>>()
        .join(",")
}

fn join_ids(ids: &[i32]) -> String {
    ids.iter().map(i32::to_string).collect::<Vec<_>>().join(",")
}

fn format_share(share: f64) -> String {
    format!("{}", (share * 1e6).round() / 1e6)
}

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    pub response_level_weighting_available: bool,
    pub percentage_tolerance: f64,
}

impl From<&WeightingConfig> for ValidatorOptions {
    fn from(config: &WeightingConfig) -> Self {
        ValidatorOptions {
            response_level_weighting_available: config.response_level_weighting_available,
            percentage_tolerance: config.percentage_tolerance,
        }
    }
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        ValidatorOptions::from(&WeightingConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceWeightingValidator {
    options: ValidatorOptions,
}

struct Grouping<'a> {
    parent_is_grouped: bool,
    parent_with_grouping: Option<&'a str>,
}

impl ReferenceWeightingValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        ReferenceWeightingValidator { options }
    }

    pub fn is_valid(
        &self,
        has_root_response_level_weighting: bool,
        plans: &[WeightingPlan],
        catalog: &dyn MetricCatalog,
    ) -> ValidationReport {
        let mut messages = Vec::new();
        let is_valid = if plans.is_empty() {
            if !has_root_response_level_weighting {
                messages.push(WeightingValidationMessage::error(ErrorMessageType::EmptyPlan).at(&[]));
            }
            has_root_response_level_weighting
        } else {
            let root = Grouping {
                parent_is_grouped: false,
                parent_with_grouping: None,
            };
            self.validate_plans(plans, &[], catalog, &mut messages, &root)
        };
        ValidationReport { is_valid, messages }
    }

    /// Reports every plan dimension, at any depth, the catalog does not know.
    pub fn validate_variables_exist(
        &self,
        plans: &[WeightingPlan],
        catalog: &dyn MetricCatalog,
        messages: &mut Vec<WeightingValidationMessage>,
    ) -> bool {
        let mut missing = BTreeSet::new();
        collect_missing(plans, catalog, &mut missing);
        let all_exist = missing.is_empty();
        for name in missing {
            let mut message = WeightingValidationMessage::error(ErrorMessageType::MissingVariable);
            message.variable = name;
            messages.push(message);
        }
        all_exist
    }

    pub fn convert_messages(&self, messages: &[WeightingValidationMessage]) -> Vec<Message> {
        messages
            .iter()
            .map(|message| Message {
                path: message.path.clone(),
                message_text: self.message_text(message),
                error_level: message.error_level,
            })
            .collect()
    }

    fn message_text(&self, message: &WeightingValidationMessage) -> String {
        let path = &message.path;
        let metric = &message.filter_metric_name;
        match message.error_type {
            ErrorMessageType::MissingVariable => format!("Variable {} undefined", message.variable),
            ErrorMessageType::MissingSubtreeForInstance => {
                let suspects = message
                    .suspect_metrics
                    .iter()
                    .map(|m| format!("<{}> - Instances {}", m.name, join_ids(&m.instance_ids)))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("RIM ({}) contains sub-trees ({})", path, suspects)
            }
            ErrorMessageType::InvalidNestedTarget => {
                let targets = message
                    .targets
                    .iter()
                    .map(|t| format!("{}={}", t.entity_id, t.target.map(format_share).unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join(",");
                let sum: f64 = message.targets.iter().filter_map(|t| t.target).sum();
                format!(
                    "Invalid nested target for {} <{}> {}. Adds up to {}",
                    path,
                    metric,
                    targets,
                    format_share(sum)
                )
            }
            ErrorMessageType::OverlappingWave => {
                format!("Overlapping waves for {} <{}> {}", path, metric, join_ids(&message.instance_ids))
            }
            ErrorMessageType::QuestionUsedMoreThanOnce => {
                format!("Question {} <{}> used more than once.", path, metric)
            }
            ErrorMessageType::QuestionHasNoTargets => format!("Question {} <{}> has no targets", path, metric),
            ErrorMessageType::QuestionNotValid => format!(
                "Question {} <{}> not valid{}. Either add targets to ({}) or add question with RIM{} weightings below it.",
                path,
                metric,
                if message.error_level == ErrorMessageLevel::Error { " on its own" } else { "" },
                join_ids(&message.instance_ids),
                if self.options.response_level_weighting_available { " or Response Level" } else { "" }
            ),
            ErrorMessageType::QuestionMarkedAsGrouped => format!(
                "Question {} <{}> not valid. The parent '{}' has been marked as grouped for weighting",
                path, metric, message.parent_with_grouping
            ),
            ErrorMessageType::EmptyPlan => "Empty plans are not valid".to_string(),
            ErrorMessageType::MixedTargetPercentageAndPopulation => {
                format!("Question {} <{}> has both target percentages and target sample", path, metric)
            }
            ErrorMessageType::TargetPopulationOutsideOfRoot => format!(
                "Question {} <{}> has target sample - only a singular root question can have target sample",
                path, metric
            ),
        }
    }

    fn validate_plans(
        &self,
        plans: &[WeightingPlan],
        parents: &[TargetValue],
        catalog: &dyn MetricCatalog,
        messages: &mut Vec<WeightingValidationMessage>,
        grouping: &Grouping<'_>,
    ) -> bool {
        match plans {
            [] => {
                messages.push(WeightingValidationMessage::error(ErrorMessageType::EmptyPlan).at(parents));
                false
            }
            [plan] => self.validate_single_plan(plan, parents, catalog, messages, grouping),
            _ => self.validate_rim_leaf(plans, parents, messages),
        }
    }

    fn validate_single_plan(
        &self,
        plan: &WeightingPlan,
        parents: &[TargetValue],
        catalog: &dyn MetricCatalog,
        messages: &mut Vec<WeightingValidationMessage>,
        grouping: &Grouping<'_>,
    ) -> bool {
        let with_percentage = plan.targets.iter().filter(|t| t.target.is_some()).count();
        let with_population = plan.targets.iter().filter(|t| t.target_population.is_some()).count();
        let is_root = parents.is_empty();

        if with_percentage != 0 && with_population != 0 {
            messages.push(
                WeightingValidationMessage::error(ErrorMessageType::MixedTargetPercentageAndPopulation)
                    .at(parents)
                    .for_metric(&plan.filter_metric_name),
            );
            return false;
        }
        if with_population != 0 && !is_root {
            messages.push(
                WeightingValidationMessage::error(ErrorMessageType::TargetPopulationOutsideOfRoot)
                    .at(parents)
                    .for_metric(&plan.filter_metric_name),
            );
            return false;
        }
        if parents.iter().any(|p| p.variable_name == plan.filter_metric_name) {
            messages.push(
                WeightingValidationMessage::error(ErrorMessageType::QuestionUsedMoreThanOnce)
                    .at(parents)
                    .for_metric(&plan.filter_metric_name),
            );
            return false;
        }

        if plan.is_percentage_weighting(self.options.percentage_tolerance) || plan.is_expansion_weighting_with_no_children() {
            return true;
        }
        if plan.targets.is_empty() {
            messages.push(
                WeightingValidationMessage::error(ErrorMessageType::QuestionHasNoTargets)
                    .at(parents)
                    .for_metric(&plan.filter_metric_name),
            );
            return false;
        }
        if !self.is_valid_nesting_target(plan, parents, messages) {
            return false;
        }

        if let Some(waves) = catalog.waves(&plan.filter_metric_name) {
            let overlapping = overlapping_wave_ids(waves);
            if !overlapping.is_empty() {
                let mut message = WeightingValidationMessage::error(ErrorMessageType::OverlappingWave)
                    .at(parents)
                    .for_metric(&plan.filter_metric_name);
                message.instance_ids = overlapping;
                messages.push(message);
                return false;
            }
        }

        let mut all_valid = true;
        if grouping.parent_is_grouped && plan.is_weighting_group_root {
            let mut message = WeightingValidationMessage::error(ErrorMessageType::QuestionMarkedAsGrouped)
                .at(parents)
                .for_metric(&plan.filter_metric_name);
            message.parent_with_grouping = grouping.parent_with_grouping.unwrap_or_default().to_string();
            messages.push(message);
            all_valid = false;
        }

        let own_path = path_of(parents);
        let child_grouping = Grouping {
            parent_is_grouped: plan.is_weighting_group_root || grouping.parent_is_grouped,
            parent_with_grouping: if plan.is_weighting_group_root {
                Some(own_path.as_str())
            } else {
                grouping.parent_with_grouping
            },
        };

        let mut missing_instances = Vec::new();
        for target in &plan.targets {
            if self.skips_response_level(target) {
                continue;
            }
            match &target.plans {
                Some(children) => {
                    let mut path = parents.to_vec();
                    path.push(TargetValue {
                        variable_name: plan.filter_metric_name.clone(),
                        instance_id: target.filter_metric_entity_id,
                    });
                    if !self.validate_plans(children, &path, catalog, messages, &child_grouping) {
                        all_valid = false;
                    }
                }
                None if target.target.is_none() && target.target_population.is_none() => {
                    missing_instances.push(target.filter_metric_entity_id);
                }
                None => {}
            }
        }

        if !missing_instances.is_empty() {
            let mut message = WeightingValidationMessage::new(ErrorMessageLevel::Warning, ErrorMessageType::QuestionNotValid)
                .at(parents)
                .for_metric(&plan.filter_metric_name);
            message.instance_ids = missing_instances;
            messages.push(message);
            all_valid = false;
        }
        all_valid
    }

    /// Response-level targets are weighted externally and need no goal.
    fn skips_response_level(&self, target: &WeightingTarget) -> bool {
        target.is_response_level
    }

    fn is_valid_nesting_target(
        &self,
        plan: &WeightingPlan,
        parents: &[TargetValue],
        messages: &mut Vec<WeightingValidationMessage>,
    ) -> bool {
        if !plan.has_child_plans() {
            return true;
        }
        if plan.targets.iter().all(|t| t.target.is_none()) {
            return true;
        }
        self.is_target_sum_valid(plan, parents, messages)
    }

    fn is_target_sum_valid(
        &self,
        plan: &WeightingPlan,
        parents: &[TargetValue],
        messages: &mut Vec<WeightingValidationMessage>,
    ) -> bool {
        let total: f64 = plan.targets.iter().filter_map(|t| t.target).sum();
        let is_valid = (1.0 - total).abs() < self.options.percentage_tolerance;
        if !is_valid {
            let mut message = WeightingValidationMessage::error(ErrorMessageType::InvalidNestedTarget)
                .at(parents)
                .for_metric(&plan.filter_metric_name);
            message.instance_ids = plan.targets.iter().map(|t| t.filter_metric_entity_id).collect();
            message.targets = plan
                .targets
                .iter()
                .map(|t| ValidationTarget {
                    entity_id: t.filter_metric_entity_id,
                    target: t.target,
                })
                .collect();
            messages.push(message);
        }
        is_valid
    }

    fn validate_rim_leaf(
        &self,
        plans: &[WeightingPlan],
        parents: &[TargetValue],
        messages: &mut Vec<WeightingValidationMessage>,
    ) -> bool {
        if let Some(invalid) = plans
            .iter()
            .find(|p| p.targets.iter().any(|t| t.target_population.is_some()))
        {
            messages.push(
                WeightingValidationMessage::error(ErrorMessageType::TargetPopulationOutsideOfRoot)
                    .at(parents)
                    .for_metric(&invalid.filter_metric_name),
            );
            return false;
        }

        let mut in_use: Vec<&str> = parents.iter().map(|p| p.variable_name.as_str()).collect();
        let mut sums_valid = true;
        for plan in plans {
            if in_use.contains(&plan.filter_metric_name.as_str()) {
                messages.push(
                    WeightingValidationMessage::error(ErrorMessageType::QuestionUsedMoreThanOnce)
                        .at(parents)
                        .for_metric(&plan.filter_metric_name),
                );
                return false;
            }
            in_use.push(&plan.filter_metric_name);
            sums_valid = self.is_target_sum_valid(plan, parents, messages) && sums_valid;
        }

        let suspects: Vec<&WeightingPlan> = plans.iter().filter(|p| p.has_child_plans()).collect();
        if !suspects.is_empty() {
            let mut message = WeightingValidationMessage::error(ErrorMessageType::MissingSubtreeForInstance).at(parents);
            message.suspect_metrics = suspects
                .iter()
                .map(|p| ValidationFilterMetric {
                    name: p.filter_metric_name.clone(),
                    instance_ids: p
                        .targets
                        .iter()
                        .filter(|t| t.has_child_plans())
                        .map(|t| t.filter_metric_entity_id)
                        .collect(),
                })
                .collect();
            message.instance_ids = suspects
                .iter()
                .flat_map(|p| p.targets.iter().filter(|t| t.plans.is_some()).map(|t| t.filter_metric_entity_id))
                .collect();
            messages.push(message);
            return false;
        }
        sums_valid
    }
}

fn collect_missing(plans: &[WeightingPlan], catalog: &dyn MetricCatalog, missing: &mut BTreeSet<String>) {
    for plan in plans {
        if !catalog.contains_metric(&plan.filter_metric_name) {
            missing.insert(plan.filter_metric_name.clone());
        }
        for target in &plan.targets {
            collect_missing(target.child_plans(), catalog, missing);
        }
    }
}

/// Ids of every overlapping pair, in pair order.
fn overlapping_wave_ids(waves: &[DateWave]) -> Vec<i32> {
    let mut ids = Vec::new();
    for (i, first) in waves.iter().enumerate() {
        for second in &waves[i + 1..] {
            if first.overlaps(second) {
                ids.push(first.wave_id);
                ids.push(second.wave_id);
            }
        }
    }
    ids
}
