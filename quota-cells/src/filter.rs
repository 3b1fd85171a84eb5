//! FILENAME: quota-cells/src/filter.rs
//! Respondent filter trees and the equality constraints they imply on
//! weighting dimensions.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A filter over respondents, as supplied by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseFilter {
    AlwaysInclude,
    Metric(MetricFilter),
    And { filters: Vec<ResponseFilter> },
    Or { filters: Vec<ResponseFilter> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFilter {
    pub metric_name: String,
    pub values: Vec<i32>,
    /// When set, `values` holds the inclusive bounds of a range.
    #[serde(default)]
    pub treat_values_as_range: bool,
    #[serde(default)]
    pub invert: bool,
}

/// The answers a dimension is restricted to.
#[derive(Debug, Clone, PartialEq)]
pub enum AllowedValues {
    Discrete(FxHashSet<i32>),
    Range { min: i32, max: i32 },
}

impl AllowedValues {
    pub fn contains(&self, value: i32) -> bool {
        match self {
            AllowedValues::Discrete(values) => values.contains(&value),
            AllowedValues::Range { min, max } => *min <= value && value <= *max,
        }
    }
}

impl MetricFilter {
    pub fn new(metric_name: impl Into<String>, values: Vec<i32>) -> Self {
        MetricFilter {
            metric_name: metric_name.into(),
            values,
            treat_values_as_range: false,
            invert: false,
        }
    }

    pub fn range(metric_name: impl Into<String>, min: i32, max: i32) -> Self {
        MetricFilter {
            treat_values_as_range: true,
            ..Self::new(metric_name, vec![min, max])
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    /// The positive restriction this filter places on its metric. Inverted
    /// filters restrict nothing we can use.
    pub fn allowed_values(&self) -> Option<AllowedValues> {
        if self.invert {
            return None;
        }
        if self.treat_values_as_range {
            let min = *self.values.iter().min()?;
            let max = *self.values.iter().max()?;
            return Some(AllowedValues::Range { min, max });
        }
        Some(AllowedValues::Discrete(self.values.iter().copied().collect()))
    }
}

impl ResponseFilter {
    pub fn metric(metric_name: impl Into<String>, values: Vec<i32>) -> Self {
        ResponseFilter::Metric(MetricFilter::new(metric_name, values))
    }

    pub fn and(filters: Vec<ResponseFilter>) -> Self {
        ResponseFilter::And { filters }
    }

    pub fn or(filters: Vec<ResponseFilter>) -> Self {
        ResponseFilter::Or { filters }
    }

    /// Restrictions this filter is guaranteed to impose on any of
    /// `dimensions`, keyed by dimension name.
    ///
    /// Only conjunctions are decomposed. An `Or` of a single child is that
    /// child; a wider `Or` guarantees nothing. When a conjunction restricts the
    /// same dimension twice the first restriction is kept.
    pub fn dimension_constraints(&self, dimensions: &[String]) -> BTreeMap<String, AllowedValues> {
        let mut constraints = BTreeMap::new();
        self.collect_constraints(dimensions, &mut constraints);
        constraints
    }

    fn collect_constraints(&self, dimensions: &[String], out: &mut BTreeMap<String, AllowedValues>) {
        match self {
            ResponseFilter::AlwaysInclude => {}
            ResponseFilter::Metric(filter) => {
                if !dimensions.iter().any(|d| *d == filter.metric_name) {
                    return;
                }
                if let Some(allowed) = filter.allowed_values() {
                    out.entry(filter.metric_name.clone()).or_insert(allowed);
                }
            }
            ResponseFilter::And { filters } => {
                for filter in filters {
                    filter.collect_constraints(dimensions, out);
                }
            }
            ResponseFilter::Or { filters } => {
                if let [only] = filters.as_slice() {
                    only.collect_constraints(dimensions, out);
                }
            }
        }
    }
}
