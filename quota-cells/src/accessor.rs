//! FILENAME: quota-cells/src/accessor.rs
//! Date-range and cell-group queries over a subset's populated cells.

use crate::cell::{QuotaCell, QuotaCellId};
use crate::error::{QuotaCellError, Result};
use crate::grouped::GroupedQuotaCells;
use crate::populated::PopulatedQuotaCell;
use crate::response::{to_ticks, ProfileResponse};
use crate::subset::Subset;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::ops::Range;
use std::sync::Arc;

/// One cell's share of a query result.
#[derive(Debug, Clone, Copy)]
pub struct CellResponses<'a> {
    pub quota_cell: &'a Arc<QuotaCell>,
    pub profiles: &'a [Arc<ProfileResponse>],
}

/// Read-only index of every populated cell in a subset, sorted by cell index.
#[derive(Debug)]
pub struct ProfileResponseAccessor {
    subset: Subset,
    cells: Vec<PopulatedQuotaCell>,
    /// `cells[i].cell().index()`, kept alongside for binary search.
    cell_indices: Vec<u32>,
}

impl ProfileResponseAccessor {
    pub fn new(subset: Subset, mut cells: Vec<PopulatedQuotaCell>) -> Self {
        cells.sort_by_key(|c| c.cell().index());
        cells.dedup_by_key(|c| c.cell().index());
        let cell_indices = cells.iter().map(|c| c.cell().index()).collect();
        ProfileResponseAccessor {
            subset,
            cells,
            cell_indices,
        }
    }

    pub fn subset(&self) -> &Subset {
        &self.subset
    }

    pub fn populated_cells(&self) -> &[PopulatedQuotaCell] {
        &self.cells
    }

    pub fn response_count(&self) -> usize {
        self.cells.iter().map(PopulatedQuotaCell::len).sum()
    }

    pub fn populated_cell(&self, cell: &QuotaCell) -> Result<&PopulatedQuotaCell> {
        self.cell_indices
            .binary_search(&cell.index())
            .ok()
            .map(|i| &self.cells[i])
            .filter(|populated| populated.cell().id() == cell.id())
            .ok_or_else(|| QuotaCellError::UnknownQuotaCell(cell.key().to_string()))
    }

    /// The span of `cells` that can hold members of `group`.
    fn candidate_span(&self, group: &GroupedQuotaCells) -> Range<usize> {
        let (Some(min), Some(max)) = (group.min_index(), group.max_index()) else {
            return 0..0;
        };
        let lower = i64::from(min) - 1;
        let upper = i64::from(max) + 1;
        let from = self.cell_indices.partition_point(|&i| i64::from(i) <= lower);
        let to = self.cell_indices.partition_point(|&i| i64::from(i) < upper);
        from..to.max(from)
    }

    /// Every member of `group` with all of its responses, empty cells included.
    pub fn responses(&self, group: &GroupedQuotaCells) -> Vec<CellResponses<'_>> {
        self.cells[self.candidate_span(group)]
            .iter()
            .filter(|populated| group.contains(populated.cell()))
            .map(|populated| CellResponses {
                quota_cell: populated.cell(),
                profiles: populated.profiles(),
            })
            .collect()
    }

    /// Members of `group` with at least one response timestamped within
    /// `start..=end`, each with just those responses.
    pub fn responses_within(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        group: &GroupedQuotaCells,
    ) -> Vec<CellResponses<'_>> {
        let start_ticks = to_ticks(start);
        let end_ticks = to_ticks(end);
        if start_ticks > end_ticks {
            return Vec::new();
        }

        self.cells[self.candidate_span(group)]
            .iter()
            .filter(|populated| group.contains(populated.cell()))
            .filter_map(|populated| {
                let profiles = populated.within_times_inclusive(start_ticks, end_ticks);
                (!profiles.is_empty()).then_some(CellResponses {
                    quota_cell: populated.cell(),
                    profiles,
                })
            })
            .collect()
    }

    /// Response counts for every member of `group`, zero for empty cells.
    pub fn sample_sizes(&self, group: &GroupedQuotaCells) -> FxHashMap<QuotaCellId, f64> {
        let mut sizes: FxHashMap<QuotaCellId, f64> =
            group.iter().map(|cell| (cell.id(), 0.0)).collect();
        for entry in self.responses(group) {
            sizes.insert(entry.quota_cell.id(), entry.profiles.len() as f64);
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use indexmap::IndexMap;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn cell(id: i32) -> Arc<QuotaCell> {
        let mut parts = IndexMap::new();
        parts.insert("Gender".to_string(), id.to_string());
        Arc::new(QuotaCell::new(id, Subset::new("UK"), parts))
    }

    fn populated(cell: &Arc<QuotaCell>, days: &[i64]) -> PopulatedQuotaCell {
        let profiles = days
            .iter()
            .map(|d| Arc::new(ProfileResponse::new(cell.id() * 100 + *d as i32, base() + Duration::days(*d))))
            .collect();
        PopulatedQuotaCell::new(Arc::clone(cell), profiles)
    }

    fn accessor() -> (ProfileResponseAccessor, Vec<Arc<QuotaCell>>) {
        let cells: Vec<Arc<QuotaCell>> = (0..4).map(cell).collect();
        let accessor = ProfileResponseAccessor::new(
            Subset::new("UK"),
            vec![
                populated(&cells[2], &[1, 5]),
                populated(&cells[0], &[0, 1, 2]),
                populated(&cells[1], &[]),
                populated(&cells[3], &[9]),
            ],
        );
        (accessor, cells)
    }

    #[test]
    fn test_responses_include_empty_members() {
        let (accessor, cells) = accessor();
        let group = GroupedQuotaCells::new(cells[..3].to_vec());
        let ids: Vec<i32> = accessor.responses(&group).iter().map(|r| r.quota_cell.id()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_range_query_skips_non_members_and_empty_slices() {
        let (accessor, cells) = accessor();
        let group = GroupedQuotaCells::new(vec![Arc::clone(&cells[0]), Arc::clone(&cells[2]), Arc::clone(&cells[3])]);

        let result = accessor.responses_within(&(base() + Duration::days(1)), &(base() + Duration::days(5)), &group);
        let summary: Vec<(i32, usize)> = result.iter().map(|r| (r.quota_cell.id(), r.profiles.len())).collect();
        assert_eq!(summary, vec![(0, 2), (2, 2)]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let (accessor, cells) = accessor();
        let group = GroupedQuotaCells::new(cells);
        assert!(accessor.responses_within(&(base() + Duration::days(3)), &base(), &group).is_empty());
    }

    #[test]
    fn test_sample_sizes_cover_all_members() {
        let (accessor, cells) = accessor();
        let group = GroupedQuotaCells::new(cells);
        let sizes = accessor.sample_sizes(&group);
        assert_eq!(sizes[&0], 3.0);
        assert_eq!(sizes[&1], 0.0);
        assert_eq!(sizes[&3], 1.0);
        assert_eq!(accessor.response_count(), 6);
    }

    #[test]
    fn test_unknown_cell_is_an_error() {
        let (accessor, _) = accessor();
        assert!(accessor.populated_cell(&cell(7)).is_err());
        assert_eq!(accessor.populated_cell(&cell(2)).map(|p| p.len()), Ok(2));
    }
}
