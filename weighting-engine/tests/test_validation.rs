//! FILENAME: tests/test_validation.rs
//! Plan validation at load time and through the subset repository.

mod common;

use common::*;
use log::Level;
use quota_cells::Subset;
use std::sync::Arc;
use weighting_engine::{
    ErrorMessageType, ReferenceWeightingRepository, ReferenceWeightingValidator, SubsetWeightingSetup,
    ValidatorOptions, WeightingConfig, WeightingError, WeightingPlan, WeightingTarget,
};

fn repository(rows: &[(&[(&str, i32)], usize)]) -> ReferenceWeightingRepository {
    let source = Arc::new(StaticSource {
        responses: respondents(rows),
    });
    ReferenceWeightingRepository::new(&WeightingConfig::default(), source)
}

fn setup(plans: Vec<WeightingPlan>) -> SubsetWeightingSetup {
    let metrics = metrics(&dimensions(&plans));
    SubsetWeightingSetup::new(plans, metrics)
}

#[test]
fn test_invalid_plan_is_logged_per_message() {
    capture_logs();
    let repo = repository(&[(&[("Gender", 0)], 5)]);
    let uk = Subset::new("UK");
    let plans = vec![WeightingPlan::new(
        "Region",
        vec![
            WeightingTarget::percentage(0, 0.3).with_plans(vec![gender_plan(0.5, 0.5)]),
            WeightingTarget::percentage(1, 0.3).with_plans(vec![gender_plan(0.5, 0.5)]),
        ],
    )];

    let report = repo.configure_subset(uk.clone(), setup(plans), &catalog(&["Gender"]));

    assert!(!report.is_valid);
    let types: Vec<ErrorMessageType> = report.messages.iter().map(|m| m.error_type).collect();
    assert_eq!(types, vec![ErrorMessageType::InvalidNestedTarget, ErrorMessageType::MissingVariable]);

    let errors: Vec<_> = captured_logs()
        .into_iter()
        .filter(|log| log.level == Level::Error)
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].message.contains("Adds up to 0.6"), "{}", errors[0].message);
    assert!(errors[1].message.contains("Variable Region undefined"));
    assert!(!repo.has_weightings(&uk));
}

#[test]
fn test_subset_without_valid_plans_weights_nothing() {
    let repo = repository(&[(&[("Gender", 0)], 5), (&[("Gender", 1)], 5)]);
    let uk = Subset::new("UK");
    repo.configure_subset(uk.clone(), setup(vec![gender_plan(0.5, 0.5)]), &catalog(&[]));

    let index = repo.respondents(&uk).unwrap();
    assert_eq!(index.response_count(), 10);
    let weightings = repo.get(&uk).unwrap();
    assert!(weightings.is_empty());
}

#[test]
fn test_repository_weights_configured_subset() {
    let repo = repository(&[(&[("Gender", 0)], 30), (&[("Gender", 1)], 70)]);
    let uk = Subset::new("UK").with_display_name("United Kingdom");
    let report = repo.configure_subset(uk.clone(), setup(vec![gender_plan(0.4, 0.6)]), &catalog(&["Gender"]));
    assert!(report.is_valid);
    assert!(repo.has_weightings(&uk));

    let weightings = repo.get(&uk).unwrap();
    assert_close(weightings.reference_weighting_for_key("0").unwrap().weight().unwrap(), 0.4, 1e-9);
    assert_close(repo.sample_size(&uk, &[("Gender", "1")]).unwrap(), 70.0, 0.0);

    let other = Subset::new("US");
    assert!(matches!(repo.get(&other), Err(WeightingError::NoWeightingsForSubset(_))));
    assert!(matches!(repo.respondents(&other), Err(WeightingError::UnknownSubset(_))));
}

#[test]
fn test_concurrent_first_access_shares_weightings() {
    let repo = repository(&[(&[("Gender", 0)], 3), (&[("Gender", 1)], 7)]);
    let uk = Subset::new("UK");
    repo.configure_subset(uk.clone(), setup(vec![gender_plan(0.5, 0.5)]), &catalog(&["Gender"]));

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| repo.get(&uk).unwrap())).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });
    assert!(results.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn test_validator_reads_plans_from_json() {
    let json = r#"[
        {"filterMetricName": "Gender", "targets": [
            {"filterMetricEntityId": 0, "target": 0.5},
            {"filterMetricEntityId": 1, "target": 0.5}
        ]},
        {"filterMetricName": "Age", "targets": [
            {"filterMetricEntityId": 0, "target": 0.2, "plans": [
                {"filterMetricName": "Gender", "targets": []}
            ]},
            {"filterMetricEntityId": 1, "target": 0.8}
        ]}
    ]"#;
    let plans = WeightingPlan::list_from_json_str(json).unwrap();
    let validator = ReferenceWeightingValidator::new(ValidatorOptions::default());
    let report = validator.is_valid(false, &plans, &catalog(&["Gender", "Age"]));

    assert!(!report.is_valid);
    let messages = validator.convert_messages(&report.messages);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].path, "Root");
    assert_eq!(messages[0].message_text, "RIM (Root) contains sub-trees (<Age> - Instances 0)");
}
