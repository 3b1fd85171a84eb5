//! FILENAME: quota-cells/src/enforced.rs
//! Prunes quota cells that a query filter already excludes.
//!
//! When a filter pins a weighting dimension (e.g. `Gender = 0`), every cell
//! whose key part for that dimension is another value can only hold
//! respondents the filter rejects. Dropping those cells up front saves
//! scanning their responses.

use crate::cell::QuotaCell;
use crate::filter::{AllowedValues, ResponseFilter};
use crate::grouped::GroupedQuotaCells;
use log::debug;
use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;

type AnswerTuple = SmallVec<[i32; 4]>;

/// Cells bucketed by their answers for a fixed, sorted set of dimensions.
#[derive(Debug)]
struct CellLookup {
    dimensions: Vec<String>,
    cells_by_answers: FxHashMap<AnswerTuple, Vec<Arc<QuotaCell>>>,
    /// Cells missing one of the dimensions. Never pruned.
    unclassified: Vec<Arc<QuotaCell>>,
}

impl CellLookup {
    fn build(source: &GroupedQuotaCells, dimensions: Vec<String>) -> Self {
        let mut cells_by_answers: FxHashMap<AnswerTuple, Vec<Arc<QuotaCell>>> = FxHashMap::default();
        let mut unclassified = Vec::new();

        for cell in source.iter() {
            let answers: Option<AnswerTuple> = dimensions.iter().map(|d| cell.answer_for(d)).collect();
            match answers {
                Some(answers) => cells_by_answers.entry(answers).or_default().push(Arc::clone(cell)),
                None => unclassified.push(Arc::clone(cell)),
            }
        }

        CellLookup {
            dimensions,
            cells_by_answers,
            unclassified,
        }
    }

    fn matches_shape(&self, constraints: &BTreeMap<String, AllowedValues>) -> bool {
        self.dimensions.len() == constraints.len()
            && self.dimensions.iter().zip(constraints.keys()).all(|(a, b)| a == b)
    }
}

#[derive(Debug)]
pub struct EnforcedFilteredGroupedQuotaCells {
    source: Arc<GroupedQuotaCells>,
    weighting_dimensions: Vec<String>,
    lookup: OnceCell<CellLookup>,
}

impl EnforcedFilteredGroupedQuotaCells {
    pub fn create<I, S>(source: Arc<GroupedQuotaCells>, weighting_dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnforcedFilteredGroupedQuotaCells {
            source,
            weighting_dimensions: weighting_dimensions.into_iter().map(Into::into).collect(),
            lookup: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &Arc<GroupedQuotaCells> {
        &self.source
    }

    /// The source cells minus those `filter` rules out.
    ///
    /// The lookup is built for the dimension set of the first constrained
    /// filter seen. A later filter constraining a different set gets the
    /// source back unchanged.
    pub fn filter_unnecessary(&self, filter: &ResponseFilter) -> Arc<GroupedQuotaCells> {
        let constraints = filter.dimension_constraints(&self.weighting_dimensions);
        if constraints.is_empty() {
            return Arc::clone(&self.source);
        }

        let lookup = self
            .lookup
            .get_or_init(|| CellLookup::build(&self.source, constraints.keys().cloned().collect()));

        if !lookup.matches_shape(&constraints) {
            debug!(
                target: "QUOTA",
                "filter dimensions {:?} do not match cached lookup {:?}",
                constraints.keys().collect::<Vec<_>>(),
                lookup.dimensions
            );
            return Arc::clone(&self.source);
        }

        let allowed: Vec<&AllowedValues> = constraints.values().collect();
        let mut keep: FxHashSet<i32> = lookup.unclassified.iter().map(|c| c.id()).collect();
        for (answers, cells) in &lookup.cells_by_answers {
            if answers.iter().zip(&allowed).all(|(answer, values)| values.contains(*answer)) {
                keep.extend(cells.iter().map(|c| c.id()));
            }
        }

        self.source.filtered(|cell| keep.contains(&cell.id()))
    }
}
