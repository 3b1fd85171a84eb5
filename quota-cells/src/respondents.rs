//! FILENAME: quota-cells/src/respondents.rs
//! Accumulates classified respondents for one subset, then freezes them into
//! the shared read-only index.

use crate::accessor::ProfileResponseAccessor;
use crate::cell::{QuotaCell, QuotaCellId};
use crate::error::{QuotaCellError, Result};
use crate::grouped::GroupedQuotaCells;
use crate::populated::PopulatedQuotaCell;
use crate::response::ProfileResponse;
use crate::subset::Subset;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a query applies quota-cell weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightingMethod {
    /// Unweighted: every cell, the unweighted sentinel first.
    None,
    /// Weighted: every cell except the unweighted sentinel.
    QuotaCell,
}

/// Mutable builder for a subset's respondents.
#[derive(Debug)]
pub struct RespondentRepository {
    subset: Subset,
    cells: FxHashMap<QuotaCellId, (Arc<QuotaCell>, Vec<Arc<ProfileResponse>>)>,
    response_count: usize,
}

impl RespondentRepository {
    pub fn new(subset: Subset) -> Self {
        let mut cells = FxHashMap::default();
        let unweighted = Arc::new(QuotaCell::unweighted(subset.clone()));
        cells.insert(unweighted.id(), (unweighted, Vec::new()));
        RespondentRepository {
            subset,
            cells,
            response_count: 0,
        }
    }

    pub fn subset(&self) -> &Subset {
        &self.subset
    }

    pub fn len(&self) -> usize {
        self.response_count
    }

    pub fn is_empty(&self) -> bool {
        self.response_count == 0
    }

    fn check_subset(&self, cell: &QuotaCell) -> Result<()> {
        if cell.subset() != &self.subset {
            return Err(QuotaCellError::SubsetMismatch {
                cell: cell.key().to_string(),
                cell_subset: cell.subset().id.clone(),
                expected: self.subset.id.clone(),
            });
        }
        Ok(())
    }

    /// Makes `cell` a member even if no respondent falls into it.
    pub fn register_cell(&mut self, cell: Arc<QuotaCell>) -> Result<()> {
        self.check_subset(&cell)?;
        self.cells.entry(cell.id()).or_insert_with(|| (cell, Vec::new()));
        Ok(())
    }

    pub fn add(&mut self, response: Arc<ProfileResponse>, cell: Arc<QuotaCell>) -> Result<()> {
        self.check_subset(&cell)?;
        self.cells
            .entry(cell.id())
            .or_insert_with(|| (cell, Vec::new()))
            .1
            .push(response);
        self.response_count += 1;
        Ok(())
    }

    pub fn quota_cells(&self) -> impl Iterator<Item = &Arc<QuotaCell>> {
        self.cells.values().map(|(cell, _)| cell)
    }

    pub fn grouped_quota_cells(&self, method: WeightingMethod) -> Arc<GroupedQuotaCells> {
        let cells = self
            .quota_cells()
            .filter(|cell| method == WeightingMethod::None || !cell.is_unweighted())
            .cloned();
        GroupedQuotaCells::new(cells)
    }

    /// Freezes the repository. Both cell groupings are built exactly once so
    /// every consumer sees the same `Arc`.
    pub fn into_index(self) -> RespondentIndex {
        let all_cells = self.grouped_quota_cells(WeightingMethod::None);
        let weighted_cells = self.grouped_quota_cells(WeightingMethod::QuotaCell);
        let response_count = self.response_count;
        let populated = self
            .cells
            .into_values()
            .map(|(cell, profiles)| PopulatedQuotaCell::new(cell, profiles))
            .collect();
        let accessor = ProfileResponseAccessor::new(self.subset.clone(), populated);

        debug!(
            target: "QUOTA",
            "indexed subset={} cells={} responses={}",
            self.subset,
            all_cells.len(),
            response_count
        );

        RespondentIndex {
            subset: self.subset,
            all_cells,
            weighted_cells,
            accessor,
        }
    }
}

/// Immutable respondent index for one subset, shared across threads.
#[derive(Debug)]
pub struct RespondentIndex {
    subset: Subset,
    all_cells: Arc<GroupedQuotaCells>,
    weighted_cells: Arc<GroupedQuotaCells>,
    accessor: ProfileResponseAccessor,
}

impl RespondentIndex {
    pub fn subset(&self) -> &Subset {
        &self.subset
    }

    pub fn grouped_quota_cells(&self, method: WeightingMethod) -> &Arc<GroupedQuotaCells> {
        match method {
            WeightingMethod::None => &self.all_cells,
            WeightingMethod::QuotaCell => &self.weighted_cells,
        }
    }

    pub fn accessor(&self) -> &ProfileResponseAccessor {
        &self.accessor
    }

    pub fn response_count(&self) -> usize {
        self.accessor.response_count()
    }
}
