//! End-to-end runs against in-memory stores.

mod support;

use exposure_rust::climate::{EnsembleStatistic, MemoryDatasetStore};
use exposure_rust::db::{ExposureRepository, LocalRepository};
use exposure_rust::models::{Statistic, VectorFeature};
use exposure_rust::zonal::{
    CoverageKernel, KernelError, ZonalAggregationRecord, ZonalConfig, ZonalKernel,
};
use exposure_rust::{ExposurePipeline, PipelineConfig, PipelineError, RunOutcome};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TYPES: &str = r#"["tower", "line", "substation"]"#;
const GRID_BOX: &str = "[-0.5, -0.5, 4.5, 4.5]";

fn config_toml(scenario: &str, types: &str, bbox: &str) -> String {
    format!(
        r#"
[run]
variable = "tasmax"
scenario = "{scenario}"
store_base = "/data/cmip6"
category = "power"
types = {types}

[region]
bbox = {bbox}

[ensemble]
future_years = [2050, 2051]

[aggregation]
polygon_area_threshold = 1.0

[load.metadata]
source = "fixture"
"#
    )
}

fn config_for(scenario: &str, types: &str, bbox: &str) -> PipelineConfig {
    PipelineConfig::from_toml(&config_toml(scenario, types, bbox)).unwrap()
}

fn config() -> PipelineConfig {
    config_for("ssp245", TYPES, GRID_BOX)
}

fn store() -> MemoryDatasetStore {
    support::memory_store(
        &[("MODEL-A", 0.0), ("MODEL-B", 10.0), ("MODEL-C", 20.0)],
        "ssp245",
        2050..=2051,
    )
}

fn repository() -> Arc<LocalRepository> {
    let repo = LocalRepository::new();
    repo.insert_features(
        "power_point",
        false,
        vec![support::tower(1, 1.0, 1.0), support::tower(2, 40.0, 40.0)],
    );
    repo.insert_features("power_line", false, vec![support::horizontal_line(3, 1.0, 3.0, 1.0)]);
    repo.insert_features(
        "power_polygon",
        false,
        vec![
            support::substation(4, 2.0, 2.0, 1.0),
            support::substation(5, 2.0, 2.0, 0.001),
        ],
    );
    Arc::new(repo)
}

fn pipeline(config: PipelineConfig, repo: &Arc<LocalRepository>) -> ExposurePipeline {
    ExposurePipeline::new(config, Arc::new(store()), repo.clone())
}

/// Delegates to the coverage kernel except for one feature.
struct FailOn(i64);

impl ZonalKernel for FailOn {
    fn name(&self) -> &'static str {
        "fail-on"
    }

    fn aggregate(
        &self,
        dataset: &EnsembleStatistic,
        feature: &VectorFeature,
        config: &ZonalConfig,
    ) -> Result<Vec<ZonalAggregationRecord>, KernelError> {
        if feature.id == self.0 {
            Err(KernelError::new(feature.id, "unreadable geometry"))
        } else {
            CoverageKernel.aggregate(dataset, feature, config)
        }
    }
}

#[tokio::test]
async fn test_run_loads_every_statistic() {
    let repo = repository();
    let outcome = pipeline(config(), &repo).run().await.unwrap();

    let (summary, report) = match outcome {
        RunOutcome::Loaded { summary, report } => (summary, report),
        other => panic!("expected a load, got {:?}", other),
    };
    assert_eq!(report.models_included, vec!["MODEL-A", "MODEL-B", "MODEL-C"]);
    assert_eq!(report.skipped_models, 0);
    assert_eq!(report.features_fetched, 4);
    assert_eq!(report.polygons_converted, 1);
    assert_eq!(report.rows, 4);
    assert!(report.run_checksum.is_some());

    assert_eq!(summary.variables_created, 7);
    assert_eq!(summary.staged_rows, 28);
    assert_eq!(summary.inserted_rows, 28);

    let mean = repo
        .get_variable("tasmax_ensemble_mean", "ssp245")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mean.metadata["source"], json!("fixture"));
    assert_eq!(mean.metadata["sample_size"], json!(3));
    assert_eq!(mean.metadata["derived"]["method"], json!("mean"));
    assert_eq!(
        mean.metadata["run_checksum"],
        json!(report.run_checksum.unwrap())
    );
    assert_eq!(repo.count_exposures(mean.variable_id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let repo = repository();
    pipeline(config(), &repo).run().await.unwrap();
    let stored = repo.exposure_count();

    let outcome = pipeline(config(), &repo).run().await.unwrap();
    let summary = outcome.summary().unwrap();
    assert_eq!(summary.variables_created, 0);
    assert_eq!(summary.inserted_rows, 0);
    assert_eq!(summary.duplicate_rows(), summary.staged_rows);
    assert_eq!(repo.exposure_count(), stored);
}

#[tokio::test]
async fn test_region_off_the_grid_writes_nothing() {
    let repo = repository();
    let config = config_for("ssp245", TYPES, "[100.0, 50.0, 120.0, 60.0]");
    let outcome = pipeline(config, &repo).run().await.unwrap();

    assert!(matches!(outcome, RunOutcome::EmptyRegion { .. }));
    assert_eq!(outcome.report().features_fetched, 0);
    assert_eq!(outcome.report().models_included.len(), 3);
    assert!(repo.variables().is_empty());
    assert_eq!(repo.exposure_count(), 0);
}

#[tokio::test]
async fn test_no_matching_features_writes_nothing() {
    let repo = repository();
    let config = config_for("ssp245", r#"["cable"]"#, GRID_BOX);
    let outcome = pipeline(config, &repo).run().await.unwrap();

    assert!(matches!(outcome, RunOutcome::NoRows { .. }));
    assert!(outcome.summary().is_none());
    assert_eq!(repo.exposure_count(), 0);
}

#[tokio::test]
async fn test_failed_chunk_still_loads_other_features() {
    let repo = repository();
    let outcome = pipeline(config(), &repo)
        .with_kernel(Arc::new(FailOn(3)))
        .run()
        .await
        .unwrap();

    let report = outcome.report();
    let aggregation = report.aggregation.as_ref().unwrap();
    assert!(!aggregation.failed_chunks.is_empty());
    assert!(report.rows < 4);
    assert!(report.rows >= 2);
    assert_eq!(outcome.summary().unwrap().inserted_rows, report.rows * 7);
}

#[tokio::test]
async fn test_failed_load_leaves_store_untouched() {
    let repo = repository();
    repo.fail_next_load("disk full");
    let err = pipeline(config(), &repo).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Load { .. }));
    assert_eq!(err.stage(), "load");
    assert!(repo.variables().is_empty());
    assert_eq!(repo.exposure_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run_does_not_load() {
    let repo = repository();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline(config(), &repo)
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { .. }));
    assert_eq!(repo.exposure_count(), 0);
}

#[tokio::test]
async fn test_missing_scenario_everywhere_is_fatal() {
    let repo = repository();
    let config = config_for("ssp585", TYPES, GRID_BOX);
    let err = pipeline(config, &repo).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyEnsemble { .. }));
    assert_eq!(repo.exposure_count(), 0);
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, config_toml("ssp245", TYPES, GRID_BOX)).unwrap();

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.ensemble.future_years, [2050, 2051]);
    assert_eq!(config.aggregation.polygon_area_threshold, Some(1.0));
    assert_eq!(
        config.load_request().variable_name(Statistic::Q1),
        "tasmax_ensemble_q1"
    );
    assert!(PipelineConfig::from_file(dir.path().join("missing.toml")).is_err());
}
