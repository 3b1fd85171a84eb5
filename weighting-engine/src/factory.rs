//! FILENAME: weighting-engine/src/factory.rs
//! Classifies respondents into quota cells by walking the plan tree.
//!
//! Not thread safe: cells are created on demand as new leaves are reached.
//! Own one factory per subset while building its respondent index.

use crate::classification::{ClassificationFn, MetricClassification};
use crate::definition::{WeightingPlan, WeightingTarget};
use crate::tree::{QuotaCellLeaf, QuotaCellNode, QuotaCellTree};
use indexmap::IndexMap;
use log::{debug, error};
use quota_cells::{ProfileResponse, QuotaCell, QuotaCellId, ResponseId, Subset};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use std::sync::Arc;

/// Answers taken from the root to a leaf. Identifies the leaf uniquely.
type LeafPath = SmallVec<[i32; 4]>;

// ============================================================================
// RESPONSE-LEVEL WEIGHTING
// ============================================================================

/// Externally computed quota assignments for part of the tree.
#[derive(Debug, Clone, Default)]
pub struct ResponseLevelAssignments {
    pub response_id_to_quota_cell_id: FxHashMap<ResponseId, i32>,
}

/// Supplies per-response quota assignments that replace tree classification
/// for a subtree.
pub trait ResponseLevelQuotaCellLoader {
    /// Assignments for the subtree under `parent_target`, `None` at the root.
    /// Returns `None` when the subtree is classified normally.
    fn possible_response_weightings(&self, parent_target: Option<&WeightingTarget>) -> Option<ResponseLevelAssignments>;
}

// ============================================================================
// ALLOCATION DIAGNOSTICS
// ============================================================================

pub const NOTE_NO_WEIGHTING: &str = "No weighting";
pub const NOTE_NO_DATA: &str = "No data";
pub const NOTE_NO_DATA_POSSIBLY_OK: &str = "No data, possibly OK";

/// One step of the explanation for a respondent's cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCellAllocationReason {
    pub dimension: String,
    pub answer: Option<i32>,
    pub note: String,
}

impl QuotaCellAllocationReason {
    fn new(dimension: &str, answer: Option<i32>, note: &str) -> Self {
        QuotaCellAllocationReason {
            dimension: dimension.to_string(),
            answer,
            note: note.to_string(),
        }
    }
}

// ============================================================================
// FACTORY
// ============================================================================

struct LocatedLeaf<'a> {
    path: LeafPath,
    dimensions: SmallVec<[&'a str; 4]>,
    leaf: &'a QuotaCellLeaf,
}

pub struct QuotaCellFactory {
    subset: Subset,
    unweighted_cell: Arc<QuotaCell>,
    tree: Option<QuotaCellNode>,
    classifiers: FxHashMap<String, ClassificationFn>,
    existing_cells: FxHashMap<LeafPath, Arc<QuotaCell>>,
    /// Every cell handed out, unweighted sentinel first.
    all_cells: Vec<Arc<QuotaCell>>,
}

impl QuotaCellFactory {
    pub fn new(
        subset: Subset,
        plans: &[WeightingPlan],
        metrics: Vec<MetricClassification>,
        loader: Option<&dyn ResponseLevelQuotaCellLoader>,
    ) -> Self {
        let unweighted_cell = Arc::new(QuotaCell::unweighted(subset.clone()));
        let mut tree = QuotaCellNode::from_plans(plans);
        let mut classifiers: FxHashMap<String, ClassificationFn> = metrics
            .into_iter()
            .map(|metric| (metric.metric_name.clone(), metric.into_classifier()))
            .collect();

        if let (Some(loader), Some(root)) = (loader, tree.as_mut()) {
            let mut overrides = ResponseLevelOverrides::default();
            overrides.traverse_node(loader, root, None, plans);
            overrides.install(&mut classifiers);
        }

        QuotaCellFactory {
            subset,
            all_cells: vec![Arc::clone(&unweighted_cell)],
            unweighted_cell,
            tree,
            classifiers,
            existing_cells: FxHashMap::default(),
        }
    }

    pub fn subset(&self) -> &Subset {
        &self.subset
    }

    pub fn tree(&self) -> Option<&QuotaCellNode> {
        self.tree.as_ref()
    }

    pub fn unweighted_cell(&self) -> &Arc<QuotaCell> {
        &self.unweighted_cell
    }

    pub fn all_quota_cells(&self) -> &[Arc<QuotaCell>] {
        &self.all_cells
    }

    fn dimension_answer(&self, response: &ProfileResponse, node: &QuotaCellNode) -> Option<i32> {
        match self.classifiers.get(&node.filter_metric_name) {
            Some(classify) => classify(response),
            None => {
                debug!(target: "QUOTA", "no classifier for dimension {}", node.filter_metric_name);
                None
            }
        }
    }

    fn locate_leaf(&self, response: &ProfileResponse) -> Option<LocatedLeaf<'_>> {
        let mut node = self.tree.as_ref()?;
        let mut path = LeafPath::new();
        let mut dimensions = SmallVec::new();
        loop {
            let answer = self.dimension_answer(response, node)?;
            let child = node.child(answer)?;
            path.push(answer);
            dimensions.push(node.filter_metric_name.as_str());
            match child {
                QuotaCellTree::Node(next) => node = next,
                QuotaCellTree::Leaf(leaf) => {
                    return Some(LocatedLeaf {
                        path,
                        dimensions,
                        leaf,
                    })
                }
            }
        }
    }

    /// The cell `response` belongs to. Respondents with no answer for a
    /// dimension on their path, or an answer the tree has no branch for, get
    /// the unweighted cell. The same respondent always gets the same cell.
    pub fn get_quota_cell(&mut self, response: &ProfileResponse) -> Arc<QuotaCell> {
        let (path, key_parts, weighting_group_id, is_response_level_weighting) = {
            let Some(located) = self.locate_leaf(response) else {
                return Arc::clone(&self.unweighted_cell);
            };
            if let Some(cell) = self.existing_cells.get(&located.path) {
                return Arc::clone(cell);
            }
            let key_parts: IndexMap<String, String> = located
                .dimensions
                .iter()
                .zip(&located.path)
                .map(|(dimension, answer)| (dimension.to_string(), answer.to_string()))
                .collect();
            (
                located.path,
                key_parts,
                located.leaf.weighting_group_id,
                located.leaf.is_response_level_weighting,
            )
        };

        let Some(id) = next_cell_id(self.all_cells.len() - 1) else {
            error!(
                target: "QUOTA",
                "quota cell ids exhausted for subset {}; response {} is unweighted",
                self.subset,
                response.id
            );
            return Arc::clone(&self.unweighted_cell);
        };
        let cell = Arc::new(QuotaCell::with_weighting(
            id,
            self.subset.clone(),
            key_parts,
            weighting_group_id,
            is_response_level_weighting,
        ));
        self.all_cells.push(Arc::clone(&cell));
        self.existing_cells.insert(path, Arc::clone(&cell));
        cell
    }

    /// Explains how `response` was classified, one entry per dimension
    /// visited, then one per classifier the path never reached.
    pub fn quota_cell_allocation_reason(&self, response: &ProfileResponse) -> Vec<QuotaCellAllocationReason> {
        let mut reasons = Vec::new();
        let mut visited: Vec<&str> = Vec::new();
        let mut current = self.tree.as_ref();

        while let Some(node) = current {
            visited.push(&node.filter_metric_name);
            current = None;
            match self.dimension_answer(response, node) {
                Some(answer) => match node.child(answer) {
                    Some(child) => {
                        reasons.push(QuotaCellAllocationReason::new(&node.filter_metric_name, Some(answer), ""));
                        if let QuotaCellTree::Node(next) = child {
                            current = Some(next);
                        }
                    }
                    None => reasons.push(QuotaCellAllocationReason::new(
                        &node.filter_metric_name,
                        Some(answer),
                        NOTE_NO_WEIGHTING,
                    )),
                },
                None => reasons.push(QuotaCellAllocationReason::new(&node.filter_metric_name, None, NOTE_NO_DATA)),
            }
        }

        let mut unvisited: Vec<&String> = self
            .classifiers
            .keys()
            .filter(|name| !visited.contains(&name.as_str()))
            .collect();
        unvisited.sort();
        for name in unvisited {
            let answer = self.classifiers[name](response);
            let note = if answer.is_some() { "" } else { NOTE_NO_DATA_POSSIBLY_OK };
            reasons.push(QuotaCellAllocationReason::new(name, answer, note));
        }
        reasons
    }
}

// ============================================================================
// RESPONSE-LEVEL TRAVERSAL
// ============================================================================

#[derive(Default)]
struct ResponseLevelOverrides {
    lookups: Vec<FxHashMap<ResponseId, i32>>,
    dimensions: Vec<String>,
}

impl ResponseLevelOverrides {
    fn traverse_node(
        &mut self,
        loader: &dyn ResponseLevelQuotaCellLoader,
        node: &mut QuotaCellNode,
        parent_target: Option<&WeightingTarget>,
        plans: &[WeightingPlan],
    ) {
        if let Some(assignments) = loader.possible_response_weightings(parent_target) {
            self.lookups.push(assignments.response_id_to_quota_cell_id);
            if !self.dimensions.contains(&node.filter_metric_name) {
                self.dimensions.push(node.filter_metric_name.clone());
            }
            for child in node.children.values_mut() {
                if let QuotaCellTree::Leaf(leaf) = child {
                    leaf.is_response_level_weighting = true;
                }
            }
            return;
        }

        let Some(plan) = plans.iter().find(|p| p.filter_metric_name == node.filter_metric_name) else {
            return;
        };
        for (answer, child) in node.children.iter_mut() {
            let Some(target) = plan.target_for(*answer) else {
                continue;
            };
            match child {
                QuotaCellTree::Leaf(leaf) => {
                    if loader.possible_response_weightings(Some(target)).is_some() {
                        leaf.is_response_level_weighting = true;
                    }
                }
                QuotaCellTree::Node(child_node) => {
                    self.traverse_node(loader, child_node, Some(target), target.child_plans());
                }
            }
        }
    }

    /// Replaces the classifier of every overridden dimension with a lookup
    /// across all collected assignments.
    fn install(self, classifiers: &mut FxHashMap<String, ClassificationFn>) {
        if self.dimensions.is_empty() {
            return;
        }
        let lookups = Arc::new(self.lookups);
        for dimension in self.dimensions {
            let lookups = Arc::clone(&lookups);
            let classify: ClassificationFn = Arc::new(move |response: &ProfileResponse| {
                let mut found = lookups.iter().filter_map(|lookup| lookup.get(&response.id));
                let first = found.next().copied();
                if found.next().is_some() {
                    debug!(target: "QUOTA", "response {} is in multiple response-level lookups", response.id);
                    return None;
                }
                first
            });
            classifiers.insert(dimension, classify);
        }
    }
}

/// Id for the next weighted cell, given how many already exist. `None` once
/// the id space is used up.
fn next_cell_id(created: usize) -> Option<QuotaCellId> {
    QuotaCellId::try_from(created).ok()
}
