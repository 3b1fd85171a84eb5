//! FILENAME: tests/common/mod.rs
//! Fixtures and log capture for weighting engine integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{Level, LevelFilter, Log, Metadata, Record};
use quota_cells::{ProfileResponse, RespondentIndex, RespondentRepository, Subset};
use std::cell::RefCell;
use std::sync::{Arc, Once};
use weighting_engine::{
    InMemoryMetricCatalog, MetricClassification, QuotaCellFactory, ResponseSource, WeightingPlan,
    WeightingTarget,
};

// ============================================================================
// LOG CAPTURE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedLog {
    pub level: Level,
    pub target: String,
    pub message: String,
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<CapturedLog>>> = const { RefCell::new(None) };
}

struct CapturingLogger;

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED.with(|captured| {
            if let Some(logs) = captured.borrow_mut().as_mut() {
                logs.push(CapturedLog {
                    level: record.level(),
                    target: record.target().to_string(),
                    message: record.args().to_string(),
                });
            }
        });
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger;
static INIT_LOGGER: Once = Once::new();

/// Starts capturing log records emitted on the current thread.
pub fn capture_logs() {
    INIT_LOGGER.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
}

pub fn captured_logs() -> Vec<CapturedLog> {
    CAPTURED.with(|captured| captured.borrow().clone().unwrap_or_default())
}

/// Captured records at warn level or above.
pub fn captured_problems() -> Vec<CapturedLog> {
    captured_logs()
        .into_iter()
        .filter(|log| log.level <= Level::Warn)
        .collect()
}

// ============================================================================
// RESPONDENTS
// ============================================================================

pub fn start_of_fieldwork() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `count` respondents per row, all giving the row's answers. Each
/// respondent is one hour after the previous.
pub fn respondents(rows: &[(&[(&str, i32)], usize)]) -> Vec<Arc<ProfileResponse>> {
    let mut responses = Vec::new();
    for (answers, count) in rows {
        for _ in 0..*count {
            let id = responses.len() as i32;
            let mut response = ProfileResponse::new(id, start_of_fieldwork() + Duration::hours(i64::from(id)));
            for (field, value) in answers.iter() {
                response.set_answer(*field, *value);
            }
            responses.push(Arc::new(response));
        }
    }
    responses
}

pub struct StaticSource {
    pub responses: Vec<Arc<ProfileResponse>>,
}

impl ResponseSource for StaticSource {
    fn responses_for(&self, _subset: &Subset) -> Vec<Arc<ProfileResponse>> {
        self.responses.clone()
    }
}

/// Classifies `responses` along `plans` into a frozen index.
pub fn build_index(subset: &Subset, plans: &[WeightingPlan], responses: &[Arc<ProfileResponse>]) -> RespondentIndex {
    let mut factory = QuotaCellFactory::new(subset.clone(), plans, metrics(&dimensions(plans)), None);
    let mut repository = RespondentRepository::new(subset.clone());
    for response in responses {
        let cell = factory.get_quota_cell(response);
        repository.add(Arc::clone(response), cell).unwrap();
    }
    repository.into_index()
}

// ============================================================================
// PLANS
// ============================================================================

pub fn share_plan(dimension: &str, shares: &[(i32, f64)]) -> WeightingPlan {
    WeightingPlan::new(
        dimension,
        shares
            .iter()
            .map(|(answer, share)| WeightingTarget::percentage(*answer, *share))
            .collect(),
    )
}

pub fn gender_plan(male: f64, female: f64) -> WeightingPlan {
    share_plan("Gender", &[(0, male), (1, female)])
}

/// Every dimension named anywhere in `plans`, first occurrence order.
pub fn dimensions(plans: &[WeightingPlan]) -> Vec<String> {
    let mut names = Vec::new();
    collect_dimensions(plans, &mut names);
    names
}

fn collect_dimensions(plans: &[WeightingPlan], names: &mut Vec<String>) {
    for plan in plans {
        if !names.contains(&plan.filter_metric_name) {
            names.push(plan.filter_metric_name.clone());
        }
        for target in &plan.targets {
            collect_dimensions(target.child_plans(), names);
        }
    }
}

/// One field classification per dimension, reading the field of that name.
pub fn metrics(dimensions: &[String]) -> Vec<MetricClassification> {
    dimensions
        .iter()
        .map(|name| MetricClassification::from_field(name.clone(), name.clone()))
        .collect()
}

pub fn catalog(dimensions: &[&str]) -> InMemoryMetricCatalog {
    let mut catalog = InMemoryMetricCatalog::new();
    for name in dimensions {
        catalog.add_metric(*name);
    }
    catalog
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {} of {}",
        actual,
        tolerance,
        expected
    );
}
