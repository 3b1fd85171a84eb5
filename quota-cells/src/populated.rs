//! FILENAME: quota-cells/src/populated.rs
//! A quota cell together with its respondents, ordered by timestamp.

use crate::cell::QuotaCell;
use crate::response::ProfileResponse;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PopulatedQuotaCell {
    cell: Arc<QuotaCell>,
    /// Sorted ascending by timestamp. Equal timestamps keep insertion order.
    profiles: Vec<Arc<ProfileResponse>>,
    /// `profiles[i].ticks()`, kept alongside for binary search.
    ticks: Vec<i64>,
}

impl PopulatedQuotaCell {
    pub fn new(cell: Arc<QuotaCell>, mut profiles: Vec<Arc<ProfileResponse>>) -> Self {
        profiles.sort_by_key(|p| p.ticks());
        let ticks = profiles.iter().map(|p| p.ticks()).collect();
        PopulatedQuotaCell {
            cell,
            profiles,
            ticks,
        }
    }

    pub fn cell(&self) -> &Arc<QuotaCell> {
        &self.cell
    }

    pub fn profiles(&self) -> &[Arc<ProfileResponse>] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The contiguous run of profiles with `start_ticks <= t <= end_ticks`.
    ///
    /// Searches for the exclusive bounds `start - 1` and `end + 1` so that
    /// profiles exactly on either bound are included.
    pub fn within_times_inclusive(&self, start_ticks: i64, end_ticks: i64) -> &[Arc<ProfileResponse>] {
        let lower = start_ticks.saturating_sub(1);
        let upper = end_ticks.saturating_add(1);
        let from = self.ticks.partition_point(|&t| t <= lower);
        let to = self.ticks.partition_point(|&t| t < upper);
        if from >= to {
            return &[];
        }
        &self.profiles[from..to]
    }
}
