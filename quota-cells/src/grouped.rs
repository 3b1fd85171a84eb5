//! FILENAME: quota-cells/src/grouped.rs
//! Immutable, index-sorted views over a subset's quota cells.
//!
//! A `GroupedQuotaCells` never owns response data; it only narrows which
//! `Arc<QuotaCell>`s are members. Filtering returns the same `Arc` when
//! membership is unchanged so callers can key caches on `Arc::ptr_eq`.

use crate::cell::{QuotaCell, WeightingGroupId};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct GroupedQuotaCells {
    /// Sorted ascending by `index`, no duplicates.
    cells: Vec<Arc<QuotaCell>>,
    /// Partition of `cells` by weighting group. Empty for sub-groups.
    groups: Vec<Arc<GroupedQuotaCells>>,
    unfiltered: Option<Arc<GroupedQuotaCells>>,
}

impl GroupedQuotaCells {
    pub fn new(cells: impl IntoIterator<Item = Arc<QuotaCell>>) -> Arc<Self> {
        let mut cells: Vec<Arc<QuotaCell>> = cells.into_iter().collect();
        cells.sort_by_key(|c| c.index());
        cells.dedup_by_key(|c| c.index());
        let groups = partition_by_weighting_group(&cells);
        Arc::new(GroupedQuotaCells {
            cells,
            groups,
            unfiltered: None,
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn sub_group(cells: Vec<Arc<QuotaCell>>, unfiltered: Option<Arc<GroupedQuotaCells>>) -> Arc<Self> {
        Arc::new(GroupedQuotaCells {
            cells,
            groups: Vec::new(),
            unfiltered,
        })
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn cells(&self) -> &[Arc<QuotaCell>] {
        &self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QuotaCell>> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// O(log n) membership test.
    pub fn contains(&self, cell: &QuotaCell) -> bool {
        self.position_of(cell).is_some()
    }

    fn position_of(&self, cell: &QuotaCell) -> Option<usize> {
        self.cells
            .binary_search_by_key(&cell.index(), |c| c.index())
            .ok()
            .filter(|&i| self.cells[i].id() == cell.id())
    }

    pub fn min_index(&self) -> Option<u32> {
        self.cells.first().map(|c| c.index())
    }

    pub fn max_index(&self) -> Option<u32> {
        self.cells.last().map(|c| c.index())
    }

    /// Sub-collections that must each be weighted to a complete distribution.
    pub fn independently_weighted_groups(&self) -> &[Arc<GroupedQuotaCells>] {
        &self.groups
    }

    /// The collection this view was filtered from, or `self` if unfiltered.
    pub fn unfiltered(self: &Arc<Self>) -> Arc<GroupedQuotaCells> {
        match &self.unfiltered {
            Some(source) => Arc::clone(source),
            None => Arc::clone(self),
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.unfiltered.is_some()
    }

    // ========================================================================
    // FILTERING
    // ========================================================================

    /// A view holding only the cells matching `predicate`.
    ///
    /// Returns `self` when nothing is removed. Weighting groups whose
    /// membership is unchanged are shared with `self`, emptied groups are
    /// dropped.
    pub fn filtered<P>(self: &Arc<Self>, predicate: P) -> Arc<GroupedQuotaCells>
    where
        P: Fn(&QuotaCell) -> bool,
    {
        let cells: Vec<Arc<QuotaCell>> = self
            .cells
            .iter()
            .filter(|c| predicate(c))
            .cloned()
            .collect();

        if cells.len() == self.cells.len() {
            return Arc::clone(self);
        }

        let source = self.unfiltered();
        let kept = |cell: &QuotaCell| {
            cells
                .binary_search_by_key(&cell.index(), |c| c.index())
                .is_ok()
        };

        let groups = self
            .groups
            .iter()
            .filter_map(|group| {
                let members: Vec<Arc<QuotaCell>> =
                    group.cells.iter().filter(|c| kept(c)).cloned().collect();
                if members.is_empty() {
                    None
                } else if members.len() == group.cells.len() {
                    Some(Arc::clone(group))
                } else {
                    Some(Self::sub_group(members, Some(Arc::clone(&source))))
                }
            })
            .collect();

        Arc::new(GroupedQuotaCells {
            cells,
            groups,
            unfiltered: Some(source),
        })
    }

    /// Cells whose key parts contain every `(dimension, answer)` pair.
    pub fn with_key_parts(self: &Arc<Self>, parts: &[(&str, &str)]) -> Arc<GroupedQuotaCells> {
        self.filtered(|cell| {
            parts
                .iter()
                .all(|(dimension, answer)| cell.key_part(dimension) == Some(*answer))
        })
    }

    /// Cells whose answer to each listed dimension is one of its allowed
    /// answers. An empty allowed list matches nothing.
    pub fn with_allowed_answers(self: &Arc<Self>, allowed: &[(&str, &[&str])]) -> Arc<GroupedQuotaCells> {
        self.filtered(|cell| {
            allowed.iter().all(|(dimension, answers)| {
                cell.key_part(dimension)
                    .is_some_and(|answer| answers.contains(&answer))
            })
        })
    }

    /// Cells that share `group_id`.
    pub fn in_weighting_group(self: &Arc<Self>, group_id: Option<WeightingGroupId>) -> Arc<GroupedQuotaCells> {
        self.filtered(|cell| cell.weighting_group_id() == group_id)
    }
}

fn partition_by_weighting_group(cells: &[Arc<QuotaCell>]) -> Vec<Arc<GroupedQuotaCells>> {
    let mut by_group: BTreeMap<Option<WeightingGroupId>, Vec<Arc<QuotaCell>>> = BTreeMap::new();
    for cell in cells {
        by_group
            .entry(cell.weighting_group_id())
            .or_default()
            .push(Arc::clone(cell));
    }
    by_group
        .into_values()
        .map(|members| GroupedQuotaCells::sub_group(members, None))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
