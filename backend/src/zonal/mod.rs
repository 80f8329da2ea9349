//! Zonal aggregation of ensemble statistics over vector features.
//!
//! Point features are sampled at their nearest grid cell. Lines and polygons
//! are coverage-weighted over every cell they touch and are processed in
//! parallel chunks on a rayon pool (see [`scatter`]).

pub mod coverage;
pub mod engine;
pub mod kernel;
pub mod scatter;
pub mod small_polygons;
pub mod table;

pub use engine::{AggregationReport, ZonalEngine, ZonalOutcome};
pub use kernel::{CoverageKernel, KernelError, ZonalKernel};
pub use scatter::ChunkFailure;
pub use small_polygons::convert_small_polygons;
pub use table::{AggregationTable, ZonalAggregationRecord};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How cell values are combined into one value per feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZonalMethod {
    /// Coverage-weighted mean
    #[default]
    Mean,
    Max,
    Min,
    /// Coverage-weighted sum
    Sum,
}

impl ZonalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ZonalMethod::Mean => "mean",
            ZonalMethod::Max => "max",
            ZonalMethod::Min => "min",
            ZonalMethod::Sum => "sum",
        }
    }
}

impl fmt::Display for ZonalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZonalMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(ZonalMethod::Mean),
            "max" => Ok(ZonalMethod::Max),
            "min" => Ok(ZonalMethod::Min),
            "sum" => Ok(ZonalMethod::Sum),
            _ => Err(format!("Unknown zonal method: {}", s)),
        }
    }
}

/// Treatment of line features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStrategy {
    /// Length-weighted coverage of every crossed cell
    #[default]
    Coverage,
    /// Nearest-cell sampling at each (optionally simplified) vertex
    Vertices,
}

impl fmt::Display for LineStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineStrategy::Coverage => f.write_str("coverage"),
            LineStrategy::Vertices => f.write_str("vertices"),
        }
    }
}

/// Whether a polygon whose area equals the threshold counts as small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdBoundary {
    /// `area < threshold`
    #[default]
    Exclusive,
    /// `area <= threshold`
    Inclusive,
}

impl ThresholdBoundary {
    pub fn is_below(self, area: f64, threshold: f64) -> bool {
        match self {
            ThresholdBoundary::Exclusive => area < threshold,
            ThresholdBoundary::Inclusive => area <= threshold,
        }
    }
}

/// Settings for one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalConfig {
    #[serde(default)]
    pub method: ZonalMethod,
    #[serde(default)]
    pub line_strategy: LineStrategy,
    /// Simplification tolerance (grid units) for [`LineStrategy::Vertices`]
    #[serde(default)]
    pub vertex_tolerance: Option<f64>,
    /// Polygons below this geodesic area (km²) are replaced by their centroid
    #[serde(default)]
    pub polygon_area_threshold: Option<f64>,
    #[serde(default)]
    pub threshold_boundary: ThresholdBoundary,
    /// Upper bound on worker threads; defaults to the available cores
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_round_decimals")]
    pub round_decimals: Option<u32>,
    /// Wall-clock limit for the whole aggregation
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

fn default_round_decimals() -> Option<u32> {
    Some(2)
}

impl Default for ZonalConfig {
    fn default() -> Self {
        Self {
            method: ZonalMethod::default(),
            line_strategy: LineStrategy::default(),
            vertex_tolerance: None,
            polygon_area_threshold: None,
            threshold_boundary: ThresholdBoundary::default(),
            max_workers: None,
            round_decimals: default_round_decimals(),
            deadline_secs: None,
        }
    }
}

impl ZonalConfig {
    pub fn with_method(mut self, method: ZonalMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_line_strategy(mut self, strategy: LineStrategy) -> Self {
        self.line_strategy = strategy;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Worker count for `count` areal features: `min(cores, count, max_workers)`.
    pub fn worker_count(&self, count: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let limit = self.max_workers.map_or(cores, |m| m.min(cores)).max(1);
        limit.min(count)
    }
}
