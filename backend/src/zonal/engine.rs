//! Zonal aggregation driver.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::kernel::{CoverageKernel, ZonalKernel};
use super::scatter::{scatter_gather, ChunkFailure};
use super::table::{AggregationTable, ZonalAggregationRecord};
use super::ZonalConfig;
use crate::climate::EnsembleStatistic;
use crate::db::repository::ErrorContext;
use crate::error::{PipelineError, PipelineResult};
use crate::models::VectorFeature;

/// Counters describing one aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub features_processed: usize,
    pub point_features: usize,
    pub areal_features: usize,
    pub workers: usize,
    pub failed_chunks: Vec<ChunkFailure>,
    /// Point features whose kernel call failed
    pub failed_points: usize,
    /// Distinct feature ids with at least one undefined row dropped
    pub dropped_ids: usize,
    pub duplicate_rows: usize,
}

impl AggregationReport {
    /// Features lost to failed chunks.
    pub fn failed_features(&self) -> usize {
        self.failed_chunks.iter().map(|c| c.feature_count).sum::<usize>() + self.failed_points
    }
}

#[derive(Debug, Clone)]
pub struct ZonalOutcome {
    pub table: AggregationTable,
    pub report: AggregationReport,
}

/// Runs a [`ZonalKernel`] over a feature set.
///
/// Points are handled on the calling thread. Lines and polygons are split
/// into `min(cores, count, max_workers)` contiguous chunks and run on a
/// dedicated rayon pool; the dataset is shared read-only by every worker.
#[derive(Clone)]
pub struct ZonalEngine {
    config: ZonalConfig,
    kernel: Arc<dyn ZonalKernel>,
}

impl std::fmt::Debug for ZonalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZonalEngine")
            .field("config", &self.config)
            .field("kernel", &self.kernel.name())
            .finish()
    }
}

impl ZonalEngine {
    pub fn new(config: ZonalConfig) -> Self {
        Self {
            config,
            kernel: Arc::new(CoverageKernel),
        }
    }

    /// Replace the default coverage kernel.
    pub fn with_kernel(mut self, kernel: Arc<dyn ZonalKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn config(&self) -> &ZonalConfig {
        &self.config
    }

    /// Aggregate `dataset` over `features`.
    ///
    /// Failed chunks are reported on the outcome and their features dropped.
    /// Returns [`PipelineError::Cancelled`] when `cancel` fires or the
    /// configured deadline passes before every chunk finished.
    pub fn aggregate(
        &self,
        dataset: &EnsembleStatistic,
        features: &[VectorFeature],
        cancel: &CancellationToken,
    ) -> PipelineResult<ZonalOutcome> {
        let deadline = self
            .config
            .deadline_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        let stopped = || cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);

        let (points, areal): (Vec<&VectorFeature>, Vec<&VectorFeature>) =
            features.iter().partition(|f| f.geometry.is_point_like());
        let mut report = AggregationReport {
            features_processed: features.len(),
            point_features: points.len(),
            areal_features: areal.len(),
            ..Default::default()
        };
        info!(
            "Aggregating {} point and {} line/polygon feature(s) over {} bucket(s) using {}",
            points.len(),
            areal.len(),
            dataset.buckets().len(),
            self.kernel.name()
        );

        let mut table = AggregationTable::default();
        for feature in &points {
            if stopped() {
                return Err(self.cancelled(&report));
            }
            match self.kernel.aggregate(dataset, feature, &self.config) {
                Ok(records) => table.extend(records),
                Err(e) => {
                    warn!("Point aggregation failed: {}", e);
                    report.failed_points += 1;
                }
            }
        }

        report.workers = self.config.worker_count(areal.len());
        let kernel = self.kernel.as_ref();
        let config = &self.config;
        let (records, failures) = scatter_gather(&areal, report.workers, |index, chunk| {
            debug!("Chunk {} started with {} feature(s)", index, chunk.len());
            let mut out: Vec<ZonalAggregationRecord> = Vec::new();
            for feature in chunk {
                if stopped() {
                    return Err("cancelled before completion".to_string());
                }
                out.extend(
                    kernel
                        .aggregate(dataset, feature, config)
                        .map_err(|e| e.to_string())?,
                );
            }
            Ok(out)
        })
        .map_err(|e| {
            PipelineError::aggregation(
                format!("failed to build worker pool: {}", e),
                ErrorContext::new("aggregate").with_details(format!("workers={}", report.workers)),
            )
        })?;

        if stopped() {
            report.failed_chunks = failures;
            return Err(self.cancelled(&report));
        }
        for failure in &failures {
            warn!(
                "Aggregation chunk {} failed; dropping {} feature(s): {}",
                failure.chunk_index, failure.feature_count, failure.reason
            );
        }
        report.failed_chunks = failures;
        table.extend(records);

        report.dropped_ids = table.drop_undefined();
        if report.dropped_ids > 0 {
            warn!(
                "Dropped undefined rows for {} feature(s)",
                report.dropped_ids
            );
        }
        if let Some(decimals) = self.config.round_decimals {
            table.round(decimals);
        }
        report.duplicate_rows = table.dedupe();
        table.sort();

        info!(
            "Aggregation produced {} row(s) for {} feature(s); {} feature(s) lost to failures",
            table.len(),
            table.feature_ids().len(),
            report.failed_features()
        );
        Ok(ZonalOutcome { table, report })
    }

    fn cancelled(&self, report: &AggregationReport) -> PipelineError {
        warn!(
            "Aggregation cancelled after {} failed chunk(s)",
            report.failed_chunks.len()
        );
        PipelineError::cancelled(format!(
            "aggregation of {} feature(s) did not complete",
            report.features_processed
        ))
    }
}
