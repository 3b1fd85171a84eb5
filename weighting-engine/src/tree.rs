//! FILENAME: weighting-engine/src/tree.rs
//! The classification tree derived from a plan list.
//!
//! Sibling plans become a chain of nodes (first plan at the top), so every
//! combination of their answers reaches its own leaf. A target with child
//! plans continues into the tree built from those plans.

use crate::definition::{FilterMetricEntityId, WeightingPlan, WeightingTarget};
use quota_cells::WeightingGroupId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum QuotaCellTree {
    Node(QuotaCellNode),
    Leaf(QuotaCellLeaf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaCellNode {
    pub filter_metric_name: String,
    pub children: BTreeMap<FilterMetricEntityId, QuotaCellTree>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaCellLeaf {
    pub weighting_group_id: Option<WeightingGroupId>,
    pub is_response_level_weighting: bool,
}

impl QuotaCellNode {
    /// `None` for an empty plan list.
    pub fn from_plans(plans: &[WeightingPlan]) -> Option<QuotaCellNode> {
        let (first, rest) = plans.split_first()?;
        let children = first
            .targets
            .iter()
            .map(|target| {
                let child = match QuotaCellNode::from_plans(rest) {
                    Some(node) => QuotaCellTree::Node(node),
                    None => subtree_for_target(target),
                };
                (target.filter_metric_entity_id, child)
            })
            .collect();

        Some(QuotaCellNode {
            filter_metric_name: first.filter_metric_name.clone(),
            children,
        })
    }

    pub fn child(&self, answer: FilterMetricEntityId) -> Option<&QuotaCellTree> {
        self.children.get(&answer)
    }

    /// This node and every node below it, depth first.
    pub fn self_and_descendants(&self) -> Vec<&QuotaCellNode> {
        let mut nodes = vec![self];
        for child in self.children.values() {
            if let QuotaCellTree::Node(node) = child {
                nodes.extend(node.self_and_descendants());
            }
        }
        nodes
    }

    /// Distinct dimension names in first-seen order.
    pub fn dimension_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in self.self_and_descendants() {
            if !names.contains(&node.filter_metric_name.as_str()) {
                names.push(&node.filter_metric_name);
            }
        }
        names
    }

    pub fn leaf_count(&self) -> usize {
        self.children
            .values()
            .map(|child| match child {
                QuotaCellTree::Node(node) => node.leaf_count(),
                QuotaCellTree::Leaf(_) => 1,
            })
            .sum()
    }
}

fn subtree_for_target(target: &WeightingTarget) -> QuotaCellTree {
    match QuotaCellNode::from_plans(target.child_plans()) {
        Some(node) => QuotaCellTree::Node(node),
        None => QuotaCellTree::Leaf(QuotaCellLeaf {
            weighting_group_id: target.weighting_group_id,
            is_response_level_weighting: false,
        }),
    }
}
