//! FILENAME: weighting-engine/src/repository.rs
//! Per-subset weighting state: configured plans, the classified respondent
//! index and the computed reference weightings.
//!
//! The index and the weightings are each built at most once per subset and
//! shared. They live beside the setup they were built from, so reconfiguring
//! a subset replaces all three at once.

use crate::classification::MetricClassification;
use crate::config::WeightingConfig;
use crate::definition::WeightingPlan;
use crate::error::{Result, WeightingError};
use crate::factory::{QuotaCellFactory, ResponseLevelQuotaCellLoader};
use crate::reference::{QuotaCellReferenceWeightings, ReferenceWeightingCalculator};
use crate::validator::{MetricCatalog, ReferenceWeightingValidator, ValidationReport, ValidatorOptions};
use log::{error, info};
use once_cell::sync::OnceCell;
use quota_cells::{
    ProfileResponse, RespondentIndex, RespondentRepository, Subset, SubsetCache, WeightingMethod,
};
use std::sync::Arc;

/// Loads the raw responses of a subset.
pub trait ResponseSource: Send + Sync {
    fn responses_for(&self, subset: &Subset) -> Vec<Arc<ProfileResponse>>;
}

pub type SharedResponseLevelLoader = Arc<dyn ResponseLevelQuotaCellLoader + Send + Sync>;

/// What a subset is weighted by.
#[derive(Clone)]
pub struct SubsetWeightingSetup {
    pub plans: Vec<WeightingPlan>,
    pub metrics: Vec<MetricClassification>,
    pub loader: Option<SharedResponseLevelLoader>,
}

impl SubsetWeightingSetup {
    pub fn new(plans: Vec<WeightingPlan>, metrics: Vec<MetricClassification>) -> Self {
        SubsetWeightingSetup {
            plans,
            metrics,
            loader: None,
        }
    }

    pub fn with_loader(mut self, loader: SharedResponseLevelLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    fn has_root_response_level_weighting(&self) -> bool {
        self.loader
            .as_ref()
            .is_some_and(|loader| loader.possible_response_weightings(None).is_some())
    }
}

/// One configuration of a subset and everything derived from it.
struct SubsetState {
    setup: SubsetWeightingSetup,
    respondents: OnceCell<Arc<RespondentIndex>>,
    weightings: OnceCell<Arc<QuotaCellReferenceWeightings>>,
}

impl SubsetState {
    fn new(setup: SubsetWeightingSetup) -> Self {
        SubsetState {
            setup,
            respondents: OnceCell::new(),
            weightings: OnceCell::new(),
        }
    }
}

pub struct ReferenceWeightingRepository {
    calculator: ReferenceWeightingCalculator,
    validator: ReferenceWeightingValidator,
    source: Arc<dyn ResponseSource>,
    states: SubsetCache<SubsetState>,
}

impl ReferenceWeightingRepository {
    pub fn new(config: &WeightingConfig, source: Arc<dyn ResponseSource>) -> Self {
        ReferenceWeightingRepository {
            calculator: ReferenceWeightingCalculator::new(config),
            validator: ReferenceWeightingValidator::new(ValidatorOptions::from(config)),
            source,
            states: SubsetCache::new(),
        }
    }

    /// Installs `setup` for `subset`. Plans that fail validation are logged
    /// and replaced by an empty plan list, leaving the subset unweighted.
    pub fn configure_subset(
        &self,
        subset: Subset,
        mut setup: SubsetWeightingSetup,
        catalog: &dyn MetricCatalog,
    ) -> ValidationReport {
        let mut report =
            self.validator
                .is_valid(setup.has_root_response_level_weighting(), &setup.plans, catalog);
        if !setup.plans.is_empty() {
            let variables_exist =
                self.validator
                    .validate_variables_exist(&setup.plans, catalog, &mut report.messages);
            report.is_valid = report.is_valid && variables_exist;
        }

        if !report.is_valid {
            for message in self.validator.convert_messages(&report.messages) {
                error!(target: "WEIGHTING", "subset {}: {}", subset, message);
            }
            setup.plans.clear();
        }

        info!(
            target: "WEIGHTING",
            "configured subset {} with {} root plans",
            subset,
            setup.plans.len()
        );
        self.states.insert(subset, SubsetState::new(setup));
        report
    }

    pub fn has_weightings(&self, subset: &Subset) -> bool {
        self.states
            .get(subset)
            .is_some_and(|state| !state.setup.plans.is_empty())
    }

    /// The classified respondent index, built on first use.
    pub fn respondents(&self, subset: &Subset) -> Result<Arc<RespondentIndex>> {
        let state = self
            .states
            .get(subset)
            .ok_or_else(|| WeightingError::UnknownSubset(subset.to_string()))?;
        self.respondents_of(subset, &state)
    }

    fn respondents_of(&self, subset: &Subset, state: &SubsetState) -> Result<Arc<RespondentIndex>> {
        state
            .respondents
            .get_or_try_init(|| self.build_index(subset, &state.setup).map(Arc::new))
            .map(Arc::clone)
    }

    fn build_index(&self, subset: &Subset, setup: &SubsetWeightingSetup) -> Result<RespondentIndex> {
        let loader = setup
            .loader
            .as_deref()
            .map(|loader| loader as &dyn ResponseLevelQuotaCellLoader);
        let mut factory = QuotaCellFactory::new(subset.clone(), &setup.plans, setup.metrics.clone(), loader);
        let mut repository = RespondentRepository::new(subset.clone());

        for response in self.source.responses_for(subset) {
            let cell = factory.get_quota_cell(&response);
            repository.add(response, cell)?;
        }
        info!(
            target: "WEIGHTING",
            "classified {} responses for subset {} into {} quota cells",
            repository.len(),
            subset,
            factory.all_quota_cells().len()
        );
        Ok(repository.into_index())
    }

    /// Reference weightings for `subset`, computed on first use from the
    /// setup current when the call began.
    pub fn get(&self, subset: &Subset) -> Result<Arc<QuotaCellReferenceWeightings>> {
        let state = self
            .states
            .get(subset)
            .ok_or_else(|| WeightingError::NoWeightingsForSubset(subset.to_string()))?;
        state
            .weightings
            .get_or_try_init(|| {
                let index = self.respondents_of(subset, &state)?;
                let weighted_cells = index.grouped_quota_cells(WeightingMethod::QuotaCell);
                let weightings =
                    self.calculator
                        .calculate_reference_weightings(index.accessor(), weighted_cells, &state.setup.plans);
                Ok::<_, WeightingError>(Arc::new(weightings))
            })
            .map(Arc::clone)
    }

    /// Respondents in the weighted cells matching every `dimension = answer`
    /// pair.
    pub fn sample_size(&self, subset: &Subset, parts: &[(&str, &str)]) -> Result<f64> {
        let index = self.respondents(subset)?;
        let cells = index
            .grouped_quota_cells(WeightingMethod::QuotaCell)
            .with_key_parts(parts);
        Ok(index.accessor().sample_sizes(&cells).values().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WeightingTarget;
    use crate::validator::InMemoryMetricCatalog;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn gendered_responses() -> Vec<Arc<ProfileResponse>> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        (0..10)
            .map(|id| Arc::new(ProfileResponse::new(id, at).with_answer("Gender", i32::from(id >= 3))))
            .collect()
    }

    struct CountingSource {
        loads: AtomicUsize,
    }

    impl ResponseSource for CountingSource {
        fn responses_for(&self, _subset: &Subset) -> Vec<Arc<ProfileResponse>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            gendered_responses()
        }
    }

    /// Holds the first load open until the test releases it.
    struct GatedSource {
        gated: AtomicBool,
        loading: Barrier,
        release: Barrier,
    }

    impl ResponseSource for GatedSource {
        fn responses_for(&self, _subset: &Subset) -> Vec<Arc<ProfileResponse>> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.loading.wait();
                self.release.wait();
            }
            gendered_responses()
        }
    }

    fn catalog() -> InMemoryMetricCatalog {
        let mut catalog = InMemoryMetricCatalog::new();
        catalog.add_metric("Gender");
        catalog
    }

    fn gender_setup(male: f64, female: f64) -> SubsetWeightingSetup {
        SubsetWeightingSetup::new(
            vec![WeightingPlan::new(
                "Gender",
                vec![WeightingTarget::percentage(0, male), WeightingTarget::percentage(1, female)],
            )],
            vec![MetricClassification::from_field("Gender", "Gender")],
        )
    }

    fn female_weight(weightings: &QuotaCellReferenceWeightings) -> f64 {
        weightings.reference_weighting_for_key("1").unwrap().weight().unwrap()
    }

    fn repository() -> (ReferenceWeightingRepository, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        let repo = ReferenceWeightingRepository::new(&WeightingConfig::default(), source.clone());
        (repo, source)
    }

    #[test]
    fn test_unconfigured_subset_is_an_error() {
        let (repo, _) = repository();
        let err = repo.get(&Subset::new("UK")).unwrap_err();
        assert!(matches!(err, WeightingError::NoWeightingsForSubset(_)));
        assert!(!repo.has_weightings(&Subset::new("UK")));
    }

    #[test]
    fn test_weightings_are_computed_once() {
        let (repo, source) = repository();
        let uk = Subset::new("UK");
        assert!(repo.configure_subset(uk.clone(), gender_setup(0.5, 0.5), &catalog()).is_valid);

        let first = repo.get(&uk).unwrap();
        let second = repo.get(&uk).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        let male = first.reference_weighting_for_key("0").unwrap();
        assert!((male.weight().unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(repo.sample_size(&uk, &[("Gender", "1")]).unwrap(), 7.0);
    }

    #[test]
    fn test_invalid_plans_leave_subset_unweighted() {
        let (repo, _) = repository();
        let uk = Subset::new("UK");
        let report = repo.configure_subset(uk.clone(), gender_setup(0.4, 0.4), &InMemoryMetricCatalog::new());
        assert!(!report.is_valid);
        assert!(!repo.has_weightings(&uk));
    }

    #[test]
    fn test_reconfigure_recomputes() {
        let (repo, source) = repository();
        let uk = Subset::new("UK");
        repo.configure_subset(uk.clone(), gender_setup(0.5, 0.5), &catalog());
        repo.get(&uk).unwrap();
        repo.configure_subset(uk.clone(), gender_setup(0.3, 0.7), &catalog());

        let female = repo.get(&uk).unwrap().reference_weighting_for_key("1").unwrap();
        assert!((female.weight().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reconfigure_replaces_previously_fetched_weightings() {
        let (repo, _) = repository();
        let uk = Subset::new("UK");
        repo.configure_subset(uk.clone(), gender_setup(0.5, 0.5), &catalog());
        let before = repo.get(&uk).unwrap();
        let index_before = repo.respondents(&uk).unwrap();

        repo.configure_subset(uk.clone(), gender_setup(0.3, 0.7), &catalog());
        let after = repo.get(&uk).unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!Arc::ptr_eq(&index_before, &repo.respondents(&uk).unwrap()));
        assert!((female_weight(&before) - 0.5).abs() < 1e-9);
        assert!((female_weight(&after) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_computation_in_flight_during_reconfigure_is_not_kept() {
        let source = Arc::new(GatedSource {
            gated: AtomicBool::new(true),
            loading: Barrier::new(2),
            release: Barrier::new(2),
        });
        let repo = ReferenceWeightingRepository::new(&WeightingConfig::default(), source.clone());
        let uk = Subset::new("UK");
        repo.configure_subset(uk.clone(), gender_setup(0.5, 0.5), &catalog());

        let stale = std::thread::scope(|scope| {
            let pending = scope.spawn(|| repo.get(&uk).unwrap());
            source.loading.wait();
            repo.configure_subset(uk.clone(), gender_setup(0.3, 0.7), &catalog());
            source.release.wait();
            pending.join().unwrap()
        });

        assert!((female_weight(&stale) - 0.5).abs() < 1e-9);
        let current = repo.get(&uk).unwrap();
        assert!(!Arc::ptr_eq(&stale, &current));
        assert!((female_weight(&current) - 0.7).abs() < 1e-9);
    }
}
