//! FILENAME: weighting-engine/src/classification.rs
//! Per-metric functions mapping a respondent to an answer value.

use quota_cells::ProfileResponse;
use std::fmt;
use std::sync::Arc;

/// Answer value for one dimension, or `None` when the respondent has none.
pub type ClassificationFn = Arc<dyn Fn(&ProfileResponse) -> Option<i32> + Send + Sync>;

/// A respondent's value for one entity instance of a multi-entity metric.
pub type InstanceValueFn = Arc<dyn Fn(&ProfileResponse) -> Option<f64> + Send + Sync>;

#[derive(Clone)]
pub enum PrimaryVariable {
    /// The metric answers directly with the value to classify by.
    SingleEntity(ClassificationFn),
    /// One value per instance; the respondent is classified as the instance
    /// with the highest value.
    EntityInstances(Vec<(i32, InstanceValueFn)>),
}

/// How to classify respondents for one weighting dimension.
#[derive(Clone)]
pub struct MetricClassification {
    pub metric_name: String,
    pub primary: PrimaryVariable,
}

impl fmt::Debug for MetricClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.primary {
            PrimaryVariable::SingleEntity(_) => "single entity".to_string(),
            PrimaryVariable::EntityInstances(instances) => format!("{} instances", instances.len()),
        };
        write!(f, "MetricClassification({}, {})", self.metric_name, kind)
    }
}

impl MetricClassification {
    pub fn single_entity<F>(metric_name: impl Into<String>, classify: F) -> Self
    where
        F: Fn(&ProfileResponse) -> Option<i32> + Send + Sync + 'static,
    {
        MetricClassification {
            metric_name: metric_name.into(),
            primary: PrimaryVariable::SingleEntity(Arc::new(classify)),
        }
    }

    /// Classifies by the respondent's coded answer to `field`.
    pub fn from_field(metric_name: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        Self::single_entity(metric_name, move |response| response.answer(&field))
    }

    pub fn entity_instances(metric_name: impl Into<String>, instances: Vec<(i32, InstanceValueFn)>) -> Self {
        MetricClassification {
            metric_name: metric_name.into(),
            primary: PrimaryVariable::EntityInstances(instances),
        }
    }

    pub fn into_classifier(self) -> ClassificationFn {
        match self.primary {
            PrimaryVariable::SingleEntity(classify) => classify,
            PrimaryVariable::EntityInstances(instances) => {
                Arc::new(move |response: &ProfileResponse| highest_instance(&instances, response))
            }
        }
    }
}

/// The instance with the highest value. Earlier instances win ties.
fn highest_instance(instances: &[(i32, InstanceValueFn)], response: &ProfileResponse) -> Option<i32> {
    let mut best: Option<(i32, f64)> = None;
    for (instance, value_of) in instances {
        let Some(value) = value_of(response) else {
            continue;
        };
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((*instance, value)),
        }
    }
    best.map(|(instance, _)| instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn response() -> ProfileResponse {
        ProfileResponse::new(1, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .with_answer("Gender", 1)
            .with_answer("Brand_10", 3)
            .with_answer("Brand_20", 5)
            .with_answer("Brand_30", 5)
    }

    fn brand(instance: i32) -> (i32, InstanceValueFn) {
        let field = format!("Brand_{}", instance);
        let value: InstanceValueFn = Arc::new(move |r: &ProfileResponse| r.answer(&field).map(f64::from));
        (instance, value)
    }

    #[test]
    fn test_field_classification() {
        let classify = MetricClassification::from_field("Gender", "Gender").into_classifier();
        assert_eq!(classify(&response()), Some(1));

        let missing = MetricClassification::from_field("Age", "Age").into_classifier();
        assert_eq!(missing(&response()), None);
    }

    #[test]
    fn test_highest_instance_wins_first_on_tie() {
        let classify = MetricClassification::entity_instances(
            "Brand",
            vec![brand(10), brand(20), brand(30), brand(40)],
        )
        .into_classifier();
        assert_eq!(classify(&response()), Some(20));
    }

    #[test]
    fn test_no_instance_values_is_no_answer() {
        let classify = MetricClassification::entity_instances("Brand", vec![brand(40)]).into_classifier();
        assert_eq!(classify(&response()), None);
    }
}
