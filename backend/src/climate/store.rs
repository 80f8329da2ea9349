//! Access to per-model, per-year gridded datasets.
//!
//! Stores follow the layout
//! `{base}/{model}/{scenario}/{member}/{variable}_day_*.{format}` with the
//! year encoded as the final `_{YYYY}` suffix of each per-year store.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use ndarray::{Array3, Axis};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::grid::{sort_along, Grid, GridError};

/// Model directories with this name hold pre-computed ensembles, not members.
pub const ENSEMBLE_DIR: &str = "ENSEMBLE";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse dataset {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Invalid grid in {path}: {source}")]
    Grid {
        path: String,
        #[source]
        source: GridError,
    },
    #[error("Dataset not found: {0}")]
    NotFound(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A single per-year store discovered for a model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearStore {
    pub year: i32,
    pub location: String,
}

/// Daily values for one model and one year, dimensioned `(time, y, x)`.
#[derive(Debug, Clone)]
pub struct DailySlab {
    pub grid: Grid,
    pub dates: Vec<NaiveDate>,
    pub values: Array3<f64>,
}

impl DailySlab {
    /// Build a slab, sorting both spatial axes ascending.
    pub fn new(
        dates: Vec<NaiveDate>,
        y: Vec<f64>,
        x: Vec<f64>,
        values: Array3<f64>,
    ) -> Result<Self, GridError> {
        let expected = vec![dates.len(), y.len(), x.len()];
        if values.shape() != expected.as_slice() {
            return Err(GridError::ShapeMismatch {
                expected,
                found: values.shape().to_vec(),
            });
        }
        let (y, values) = sort_along(y, values, Axis(1));
        let (x, values) = sort_along(x, values, Axis(2));
        Ok(Self {
            grid: Grid::new(x, y)?,
            dates,
            values,
        })
    }
}

/// Read-only access to a tree of gridded model outputs.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Candidate model names under the store base, sorted.
    async fn list_models(&self) -> StoreResult<Vec<String>>;

    /// Whether `model` publishes output for `scenario`.
    async fn has_scenario(&self, model: &str, scenario: &str) -> StoreResult<bool>;

    /// Per-year stores for the variable, sorted by year.
    async fn list_year_stores(
        &self,
        model: &str,
        scenario: &str,
        variable: &str,
    ) -> StoreResult<Vec<YearStore>>;

    /// Load one per-year store.
    async fn open_year(&self, store: &YearStore, variable: &str) -> StoreResult<DailySlab>;
}

/// Extract the year from a per-year store name such as
/// `tasmax_day_ACCESS-CM2_ssp245_r1i1p1f1_gn_2051.json`.
pub fn parse_store_year(file_name: &str, format: &str) -> Option<i32> {
    let stem = file_name.strip_suffix(format)?.strip_suffix('.')?;
    let (_, year) = stem.rsplit_once('_')?;
    if year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()) {
        year.parse().ok()
    } else {
        None
    }
}

fn matches_variable(file_name: &str, variable: &str, format: &str) -> bool {
    file_name
        .strip_prefix(variable)
        .and_then(|rest| rest.strip_prefix("_day_"))
        .is_some_and(|rest| rest.ends_with(&format!(".{}", format)))
}

/// On-disk per-year document. `null` values become NaN.
#[derive(Deserialize)]
struct YearDocument {
    time: Vec<NaiveDate>,
    y: Vec<f64>,
    x: Vec<f64>,
    values: Vec<Vec<Vec<Option<f64>>>>,
}

/// Filesystem-backed store reading JSON per-year documents.
#[derive(Debug, Clone)]
pub struct LocalDatasetStore {
    base: PathBuf,
    format: String,
}

impl LocalDatasetStore {
    pub fn new(base: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            format: format.into(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    async fn subdirectories(path: &Path) -> StoreResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(path, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| StoreError::io(&entry.path(), e))?
                .is_dir();
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn year_stores_in(&self, dir: &Path, variable: &str) -> StoreResult<Vec<YearStore>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StoreError::io(dir, e))?;
        let mut stores = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !matches_variable(&name, variable, &self.format) {
                continue;
            }
            match parse_store_year(&name, &self.format) {
                Some(year) => stores.push(YearStore {
                    year,
                    location: entry.path().display().to_string(),
                }),
                None => debug!("Ignoring store without a year suffix: {}", name),
            }
        }
        stores.sort();
        Ok(stores)
    }
}

#[async_trait]
impl DatasetStore for LocalDatasetStore {
    async fn list_models(&self) -> StoreResult<Vec<String>> {
        let mut models = Self::subdirectories(&self.base).await?;
        models.retain(|m| m != ENSEMBLE_DIR);
        Ok(models)
    }

    async fn has_scenario(&self, model: &str, scenario: &str) -> StoreResult<bool> {
        let path = self.base.join(model).join(scenario);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn list_year_stores(
        &self,
        model: &str,
        scenario: &str,
        variable: &str,
    ) -> StoreResult<Vec<YearStore>> {
        let scenario_dir = self.base.join(model).join(scenario);
        // First ensemble member (sorted) that carries the variable wins.
        for member in Self::subdirectories(&scenario_dir).await? {
            let stores = self
                .year_stores_in(&scenario_dir.join(&member), variable)
                .await?;
            if !stores.is_empty() {
                debug!(
                    "Using member {} for model {} ({} year stores)",
                    member,
                    model,
                    stores.len()
                );
                return Ok(stores);
            }
        }
        Ok(Vec::new())
    }

    async fn open_year(&self, store: &YearStore, _variable: &str) -> StoreResult<DailySlab> {
        let path = Path::new(&store.location);
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let doc: YearDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::Parse {
                path: store.location.clone(),
                message: e.to_string(),
            })?;

        let (nt, ny, nx) = (doc.time.len(), doc.y.len(), doc.x.len());
        let mut values = Array3::<f64>::from_elem((nt, ny, nx), f64::NAN);
        if doc.values.len() != nt {
            return Err(StoreError::Parse {
                path: store.location.clone(),
                message: format!("expected {} time steps, found {}", nt, doc.values.len()),
            });
        }
        for (t, plane) in doc.values.iter().enumerate() {
            if plane.len() != ny || plane.iter().any(|row| row.len() != nx) {
                return Err(StoreError::Parse {
                    path: store.location.clone(),
                    message: format!("time step {} is not a {}x{} plane", t, ny, nx),
                });
            }
            for (r, row) in plane.iter().enumerate() {
                for (c, v) in row.iter().enumerate() {
                    values[[t, r, c]] = v.unwrap_or(f64::NAN);
                }
            }
        }

        DailySlab::new(doc.time, doc.y, doc.x, values).map_err(|source| StoreError::Grid {
            path: store.location.clone(),
            source,
        })
    }
}

/// In-memory store, keyed by model then scenario.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatasetStore {
    models: HashMap<String, HashMap<String, Vec<(YearStore, DailySlab)>>>,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model directory with no scenarios.
    pub fn with_model(mut self, model: &str) -> Self {
        self.models.entry(model.to_string()).or_default();
        self
    }

    /// Add one per-year slab.
    pub fn with_year(mut self, model: &str, scenario: &str, year: i32, slab: DailySlab) -> Self {
        let location = format!("memory://{}/{}/{}", model, scenario, year);
        self.models
            .entry(model.to_string())
            .or_default()
            .entry(scenario.to_string())
            .or_default()
            .push((YearStore { year, location }, slab));
        self
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn list_models(&self) -> StoreResult<Vec<String>> {
        let mut models: Vec<String> = self
            .models
            .keys()
            .filter(|m| m.as_str() != ENSEMBLE_DIR)
            .cloned()
            .collect();
        models.sort();
        Ok(models)
    }

    async fn has_scenario(&self, model: &str, scenario: &str) -> StoreResult<bool> {
        Ok(self
            .models
            .get(model)
            .is_some_and(|s| s.contains_key(scenario)))
    }

    async fn list_year_stores(
        &self,
        model: &str,
        scenario: &str,
        _variable: &str,
    ) -> StoreResult<Vec<YearStore>> {
        let mut stores: Vec<YearStore> = self
            .models
            .get(model)
            .and_then(|s| s.get(scenario))
            .map(|years| years.iter().map(|(y, _)| y.clone()).collect())
            .unwrap_or_default();
        stores.sort();
        Ok(stores)
    }

    async fn open_year(&self, store: &YearStore, _variable: &str) -> StoreResult<DailySlab> {
        self.models
            .values()
            .flat_map(|scenarios| scenarios.values())
            .flatten()
            .find(|(y, _)| y == store)
            .map(|(_, slab)| slab.clone())
            .ok_or_else(|| StoreError::NotFound(store.location.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_year() {
        assert_eq!(
            parse_store_year("tasmax_day_ACCESS-CM2_ssp245_r1i1p1f1_gn_2051.json", "json"),
            Some(2051)
        );
        assert_eq!(parse_store_year("tasmax_day_model_20510.json", "json"), None);
        assert_eq!(parse_store_year("tasmax_day_model_2051.zarr", "json"), None);
        assert_eq!(parse_store_year("tasmax_day_model_abcd.json", "json"), None);
    }

    #[test]
    fn test_matches_variable_prefix() {
        assert!(matches_variable("pr_day_x_2015.json", "pr", "json"));
        assert!(!matches_variable("prsn_day_x_2015.json", "pr", "json"));
        assert!(!matches_variable("pr_mon_x_2015.json", "pr", "json"));
    }

    #[test]
    fn test_slab_sorts_descending_latitudes() {
        let date = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        let values = Array3::from_shape_vec((1, 2, 1), vec![1.0, 2.0]).unwrap();
        let slab = DailySlab::new(vec![date], vec![10.0, 0.0], vec![5.0], values).unwrap();
        assert_eq!(slab.grid.y().centres(), &[0.0, 10.0]);
        assert_eq!(slab.values[[0, 0, 0]], 2.0);
    }

    #[tokio::test]
    async fn test_local_store_discovers_years() {
        let dir = tempfile::tempdir().unwrap();
        let member = dir.path().join("MODEL-A").join("ssp245").join("r1i1p1f1");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::create_dir_all(dir.path().join(ENSEMBLE_DIR)).unwrap();
        let doc = r#"{"time": ["2015-01-01"], "y": [0.0], "x": [0.0], "values": [[[null]]]}"#;
        for year in [2016, 2015] {
            std::fs::write(member.join(format!("tas_day_MODEL-A_ssp245_{}.json", year)), doc)
                .unwrap();
        }
        std::fs::write(member.join("notes.txt"), "x").unwrap();

        let store = LocalDatasetStore::new(dir.path(), "json");
        assert_eq!(store.list_models().await.unwrap(), vec!["MODEL-A"]);
        assert!(store.has_scenario("MODEL-A", "ssp245").await.unwrap());
        assert!(!store.has_scenario("MODEL-A", "ssp585").await.unwrap());

        let years = store
            .list_year_stores("MODEL-A", "ssp245", "tas")
            .await
            .unwrap();
        assert_eq!(years.iter().map(|y| y.year).collect::<Vec<_>>(), vec![2015, 2016]);

        let slab = store.open_year(&years[0], "tas").await.unwrap();
        assert!(slab.values[[0, 0, 0]].is_nan());
    }
}
