//! End-to-end run for one `(variable, scenario)`.
//!
//! Reduce the ensemble, cut it to the region, read the features, aggregate
//! and load. The repository is only used before and after aggregation, so
//! no pooled connection is held while the workers run.

use log::{info, warn};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::climate::{DatasetStore, EnsembleReducer, EnsembleStatistic};
use crate::config::PipelineConfig;
use crate::db::calculate_checksum;
use crate::db::repository::{ErrorContext, FullRepository};
use crate::error::{PipelineError, PipelineResult};
use crate::load::LoadSummary;
use crate::models::BoundingRegion;
use crate::zonal::{convert_small_polygons, AggregationReport, ZonalEngine, ZonalKernel};

/// What a run did, whichever way it ended.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub variable: String,
    pub scenario: String,
    pub models_included: Vec<String>,
    /// Candidate models that failed validation
    pub skipped_models: usize,
    pub features_fetched: usize,
    /// Small polygons sampled at their centroid
    pub polygons_converted: usize,
    pub aggregation: Option<AggregationReport>,
    pub rows: usize,
    pub run_checksum: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Rows were handed to the repository.
    Loaded {
        summary: LoadSummary,
        report: RunReport,
    },
    /// The region does not overlap the climate grid. Nothing was queried
    /// or written.
    EmptyRegion { report: RunReport },
    /// No feature produced a defined value. Nothing was written.
    NoRows { report: RunReport },
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Loaded { report, .. }
            | RunOutcome::EmptyRegion { report }
            | RunOutcome::NoRows { report } => report,
        }
    }

    pub fn summary(&self) -> Option<&LoadSummary> {
        match self {
            RunOutcome::Loaded { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

pub struct ExposurePipeline {
    config: PipelineConfig,
    store: Arc<dyn DatasetStore>,
    repository: Arc<dyn FullRepository>,
    engine: ZonalEngine,
    cancel: CancellationToken,
}

impl ExposurePipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn DatasetStore>,
        repository: Arc<dyn FullRepository>,
    ) -> Self {
        let engine = ZonalEngine::new(config.aggregation.clone());
        Self {
            config,
            store,
            repository,
            engine,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn ZonalKernel>) -> Self {
        self.engine = self.engine.with_kernel(kernel);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self) -> PipelineResult<RunOutcome> {
        let run = &self.config.run;
        let mut report = RunReport {
            variable: run.variable.clone(),
            scenario: run.scenario.clone(),
            ..Default::default()
        };
        let region = self.config.region.to_region()?;

        info!("Stage 1/4: reducing ensemble for {}/{}", run.variable, run.scenario);
        let outcome = EnsembleReducer::new(self.config.ensemble.clone())
            .reduce(self.store.as_ref(), &self.config.ensemble_request())
            .await?;
        report.skipped_models = outcome.skipped.len();
        report.models_included = outcome.statistic.models_included().to_vec();

        let dataset = outcome.statistic.normalize_longitudes().map_err(|e| {
            PipelineError::aggregation(e.to_string(), ErrorContext::new("normalize_longitudes"))
        })?;
        let Some(dataset) = clip_to_region(dataset, region.as_ref()) else {
            warn!(
                "Region does not overlap the {} grid; nothing to aggregate",
                run.variable
            );
            return Ok(RunOutcome::EmptyRegion { report });
        };

        info!("Stage 2/4: querying {} features", run.category);
        let registry = self
            .repository
            .load_schema_registry(&self.config.query)
            .await?;
        let mut query = self.config.feature_query();
        if let Some(region) = region {
            query = query.with_region(region);
        }
        let features = self.repository.fetch_features(&registry, &query).await?;
        report.features_fetched = features.len();
        if features.is_empty() {
            warn!("No {} features matched the query", run.category);
            return Ok(RunOutcome::NoRows { report });
        }
        let (features, converted) = convert_small_polygons(
            features,
            self.config.aggregation.polygon_area_threshold,
            self.config.aggregation.threshold_boundary,
        );
        report.polygons_converted = converted;

        info!("Stage 3/4: aggregating {} feature(s)", features.len());
        let engine = self.engine.clone();
        let cancel = self.cancel.clone();
        let zonal =
            tokio::task::spawn_blocking(move || engine.aggregate(&dataset, &features, &cancel))
                .await
            .map_err(|e| {
                PipelineError::aggregation(
                    format!("aggregation task failed: {}", e),
                    ErrorContext::new("spawn_blocking"),
                )
            })??;
        report.rows = zonal.table.len();
        report.aggregation = Some(zonal.report);
        if zonal.table.is_empty() {
            warn!("Aggregation produced no rows; nothing to load");
            return Ok(RunOutcome::NoRows { report });
        }
        if self.cancel.is_cancelled() {
            return Err(PipelineError::cancelled("run cancelled before load"));
        }

        info!("Stage 4/4: loading {} row(s)", zonal.table.len());
        let checksum = calculate_checksum(&format!(
            "{}|{}|{}|{}",
            run.variable,
            run.scenario,
            report.models_included.join(","),
            report.rows
        ));
        info!("Run checksum {}", checksum);
        let metadata = self.variable_metadata(&report, &checksum);
        report.run_checksum = Some(checksum);

        let batch = self
            .config
            .load_request()
            .with_metadata(metadata)
            .prepare(&zonal.table);
        let summary = self
            .repository
            .load_exposures(&batch)
            .await
            .map_err(PipelineError::load)?;
        info!(
            "Run complete: {} row(s) inserted, {} already present",
            summary.inserted_rows,
            summary.duplicate_rows()
        );
        Ok(RunOutcome::Loaded { summary, report })
    }

    /// Caller metadata plus how the values were derived.
    fn variable_metadata(&self, report: &RunReport, checksum: &str) -> Value {
        let mut metadata = match &self.config.load.metadata {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => Map::from_iter([("metadata".to_string(), other.clone())]),
        };
        let aggregation = &self.config.aggregation;
        metadata.insert(
            "derived".to_string(),
            json!({
                "method": aggregation.method.as_str(),
                "line_strategy": aggregation.line_strategy,
                "polygon_area_threshold": aggregation.polygon_area_threshold,
            }),
        );
        metadata.insert("sample_size".to_string(), json!(report.models_included.len()));
        metadata.insert("models_included".to_string(), json!(report.models_included));
        metadata.insert("run_checksum".to_string(), json!(checksum));
        Value::Object(metadata)
    }
}

/// Cut the dataset to the region's envelope. `None` when nothing overlaps.
fn clip_to_region(
    dataset: EnsembleStatistic,
    region: Option<&BoundingRegion>,
) -> Option<EnsembleStatistic> {
    match region {
        None => Some(dataset),
        Some(region) => region.envelope().and_then(|bbox| dataset.subset(&bbox)),
    }
}
