//! Pipeline configuration loaded from `pipeline.toml`.
//!
//! ```toml
//! [run]
//! variable = "tasmax"
//! scenario = "ssp245"
//! store_base = "/data/cmip6"
//! category = "power"
//! types = ["line", "tower"]
//!
//! [region]
//! bbox = [-124.5, 32.5, -114.0, 42.0]
//!
//! [aggregation]
//! method = "mean"
//! polygon_area_threshold = 1.0
//!
//! [load]
//! maintenance_work_mem = "2GB"
//! max_parallel_workers = 4
//!
//! [repository]
//! type = "postgres"
//!
//! [postgres]
//! database_url = "postgres://climate@localhost/climate"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::climate::{EnsembleRequest, ReducerConfig};
use crate::db::{PostgresSettings, RepositoryConfig, RepositorySettings};
use crate::error::{PipelineError, PipelineResult};
use crate::load::{LoadRequest, LoadTuning};
use crate::models::{BoundingBox, BoundingRegion, GeometryKind, RegionError, Statistic};
use crate::query::{AdminJoin, FeatureQuery, FeatureStoreLayout};
use crate::zonal::ZonalConfig;

/// What to compute and for which features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub variable: String,
    pub scenario: String,
    /// Root of the `{model}/{scenario}/...` store tree
    pub store_base: PathBuf,
    #[serde(default = "default_store_format")]
    pub store_format: String,
    pub category: String,
    pub types: Vec<String>,
    #[serde(default)]
    pub subtypes: Vec<String>,
    /// Geometry kinds to read; empty means all
    #[serde(default)]
    pub kinds: Vec<GeometryKind>,
    #[serde(default)]
    pub admin_joins: Vec<AdminJoin>,
}

fn default_store_format() -> String {
    "json".to_string()
}

/// Either a box or a polygon FeatureCollection (as JSON text).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSettings {
    /// `[xmin, ymin, xmax, ymax]`
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
    #[serde(default)]
    pub geojson: Option<String>,
}

impl RegionSettings {
    /// Parse the configured region. `geojson` wins when both are set.
    pub fn to_region(&self) -> Result<Option<BoundingRegion>, RegionError> {
        if let Some(json) = &self.geojson {
            return BoundingRegion::parse(json).map(Some);
        }
        self.bbox
            .map(|b| BoundingBox::from_array(b).map(BoundingRegion::Box))
            .transpose()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {
    #[serde(flatten)]
    pub tuning: LoadTuning,
    /// Statistic columns to load; empty means all seven
    #[serde(default)]
    pub statistics: Vec<Statistic>,
    /// Free-form metadata copied onto every variable
    #[serde(default)]
    pub metadata: Value,
}

/// Complete settings for one `(variable, scenario)` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub run: RunSettings,
    #[serde(default)]
    pub region: RegionSettings,
    #[serde(default)]
    pub ensemble: ReducerConfig,
    #[serde(default)]
    pub aggregation: ZonalConfig,
    #[serde(default)]
    pub load: LoadSettings,
    #[serde(default)]
    pub repository: RepositorySettings,
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub query: FeatureStoreLayout,
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            PipelineError::configuration(format!("Failed to parse pipeline config: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Searches `pipeline.toml`, `backend/pipeline.toml`, `../pipeline.toml`.
    pub fn from_default_location() -> PipelineResult<Self> {
        let search_paths = [
            PathBuf::from("pipeline.toml"),
            PathBuf::from("backend/pipeline.toml"),
            PathBuf::from("../pipeline.toml"),
        ];
        match search_paths.iter().find(|p| p.exists()) {
            Some(path) => Self::from_file(path),
            None => Err(PipelineError::configuration(
                "No pipeline.toml found in standard locations",
            )),
        }
    }

    /// Checks that do not need any I/O.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.run.variable.is_empty() || self.run.scenario.is_empty() {
            return Err(PipelineError::configuration(
                "run.variable and run.scenario must be set",
            ));
        }
        if self.run.types.is_empty() {
            return Err(PipelineError::configuration(
                "run.types needs at least one feature type",
            ));
        }
        if let Some(name) = self.query.invalid_identifier() {
            return Err(PipelineError::configuration(format!(
                "query layout name {:?} is not a plain identifier",
                name
            )));
        }
        self.load
            .tuning
            .validate()
            .map_err(PipelineError::configuration)?;
        self.region.to_region()?;
        Ok(())
    }

    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            repository: self.repository.clone(),
            postgres: self.postgres.clone(),
        }
    }

    pub fn ensemble_request(&self) -> EnsembleRequest {
        EnsembleRequest::new(&self.run.variable, &self.run.scenario)
    }

    /// Feature query without the region, which is applied per run.
    pub fn feature_query(&self) -> FeatureQuery {
        self.run
            .admin_joins
            .iter()
            .fold(
                FeatureQuery::new(&self.run.category, self.run.types.clone())
                    .with_subtypes(self.run.subtypes.clone())
                    .with_kinds(self.run.kinds.clone()),
                |query, join| query.with_admin_join(*join),
            )
    }

    pub fn load_request(&self) -> LoadRequest {
        let statistics = if self.load.statistics.is_empty() {
            Statistic::ALL.to_vec()
        } else {
            self.load.statistics.clone()
        };
        LoadRequest::new(&self.run.variable, &self.run.scenario)
            .with_statistics(statistics)
            .with_metadata(self.load.metadata.clone())
            .with_tuning(self.load.tuning.clone())
    }
}
