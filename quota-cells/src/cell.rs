//! FILENAME: quota-cells/src/cell.rs
//! Quota cells: the leaf buckets respondents are classified into.
//!
//! A cell is identified by its path through the weighting tree, e.g.
//! `{Region: 1, Gender: 0}`. Cells are immutable once created and shared
//! behind `Arc` by every grouping, accessor and weighting that refers to
//! them.

use crate::subset::Subset;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

pub type QuotaCellId = i32;
pub type WeightingGroupId = i32;

/// Id of the cell that holds every respondent who is not weighted.
pub const UNWEIGHTED_CELL_ID: QuotaCellId = -1;

/// Key of the unweighted cell.
pub const UNWEIGHTED_CELL_KEY: &str = "Unweighted";

const KEY_SEPARATOR: &str = ":";

// ============================================================================
// QUOTA CELL
// ============================================================================

/// An immutable bucket in a subset's weighting tree.
///
/// Equality and hashing are by `id` only. Ids are unique within a subset and
/// must be `>= UNWEIGHTED_CELL_ID`; the dense `index` is `id + 1`, so the
/// unweighted cell always sits at index 0.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCell {
    id: QuotaCellId,
    index: u32,
    subset: Subset,
    /// Dimension name to answer, in tree path order.
    key_parts: IndexMap<String, String>,
    weighting_group_id: Option<WeightingGroupId>,
    is_response_level_weighting: bool,
    key: String,
}

impl QuotaCell {
    pub fn new(id: QuotaCellId, subset: Subset, key_parts: IndexMap<String, String>) -> Self {
        Self::with_weighting(id, subset, key_parts, None, false)
    }

    pub fn with_weighting(
        id: QuotaCellId,
        subset: Subset,
        key_parts: IndexMap<String, String>,
        weighting_group_id: Option<WeightingGroupId>,
        is_response_level_weighting: bool,
    ) -> Self {
        let key = if id == UNWEIGHTED_CELL_ID {
            UNWEIGHTED_CELL_KEY.to_string()
        } else {
            key_parts
                .values()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(KEY_SEPARATOR)
        };

        QuotaCell {
            id,
            index: dense_index(id),
            subset,
            key_parts,
            weighting_group_id,
            is_response_level_weighting,
            key,
        }
    }

    /// The sentinel cell for respondents that fall outside the weighting tree.
    pub fn unweighted(subset: Subset) -> Self {
        Self::new(UNWEIGHTED_CELL_ID, subset, IndexMap::new())
    }

    pub fn id(&self) -> QuotaCellId {
        self.id
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn subset(&self) -> &Subset {
        &self.subset
    }

    pub fn key_parts(&self) -> &IndexMap<String, String> {
        &self.key_parts
    }

    pub fn key_part(&self, dimension: &str) -> Option<&str> {
        self.key_parts.get(dimension).map(String::as_str)
    }

    /// The coded answer this cell holds for `dimension`, if it has one.
    pub fn answer_for(&self, dimension: &str) -> Option<i32> {
        self.key_part(dimension).and_then(|part| part.parse().ok())
    }

    pub fn weighting_group_id(&self) -> Option<WeightingGroupId> {
        self.weighting_group_id
    }

    pub fn is_response_level_weighting(&self) -> bool {
        self.is_response_level_weighting
    }

    pub fn is_unweighted(&self) -> bool {
        self.id == UNWEIGHTED_CELL_ID
    }

    /// Answer values joined in path order, e.g. `"1:0"`.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for QuotaCell {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QuotaCell {}

impl Hash for QuotaCell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Position of `id` in a dense array with the unweighted cell at 0. Ids
/// below the unweighted id share slot 0.
fn dense_index(id: QuotaCellId) -> u32 {
    u32::try_from(i64::from(id) + 1).unwrap_or(0)
}

impl fmt::Display for QuotaCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    fn parts(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_key_joins_answers_in_path_order() {
        let cell = QuotaCell::new(0, Subset::new("UK"), parts(&[("Region", "2"), ("Gender", "1")]));
        assert_eq!(cell.key(), "2:1");
        assert_eq!(cell.answer_for("Gender"), Some(1));
        assert_eq!(cell.answer_for("Age"), None);
    }

    #[test]
    fn test_unweighted_cell_is_first() {
        let cell = QuotaCell::unweighted(Subset::new("UK"));
        assert!(cell.is_unweighted());
        assert_eq!(cell.index(), 0);
        assert_eq!(cell.key(), UNWEIGHTED_CELL_KEY);
        assert!(cell.key_parts().is_empty());
    }

    #[test]
    fn test_index_is_dense_offset_of_id() {
        let cell = QuotaCell::new(4, Subset::new("UK"), parts(&[("Gender", "0")]));
        assert_eq!(cell.index(), 5);

        let last = QuotaCell::new(QuotaCellId::MAX, Subset::new("UK"), parts(&[("Gender", "1")]));
        assert_eq!(last.index(), 1 << 31);
        assert_eq!(dense_index(UNWEIGHTED_CELL_ID), 0);
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = QuotaCell::new(3, Subset::new("UK"), parts(&[("Gender", "0")]));
        let b = QuotaCell::new(3, Subset::new("UK"), parts(&[("Gender", "1")]));
        let c = QuotaCell::new(4, Subset::new("UK"), parts(&[("Gender", "0")]));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: FxHashSet<QuotaCell> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
