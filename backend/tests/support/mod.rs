#![allow(dead_code)]

use chrono::NaiveDate;
use exposure_rust::climate::{DailySlab, EnsembleStatistic, Grid, MemoryDatasetStore};
use exposure_rust::models::{DecadeMonth, FeatureTags, VectorFeature};
use geo::{line_string, point, polygon};
use ndarray::{Array3, Axis};
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// 5x5 field on unit cells centred at 0..4, row index = y index.
pub const FIXTURE_ROWS: [[f64; 5]; 5] = [
    [10.0, 20.0, 30.0, 40.0, 50.0],
    [100.0, 200.0, 300.0, 400.0, 500.0],
    [1000.0, 2000.0, 3000.0, 4000.0, 5000.0],
    [8.0, 9.0, 10.0, 11.0, 12.0],
    [13.0, 14.0, 17.0, 16.0, 17.0],
];

pub fn axis() -> Vec<f64> {
    (0..5).map(f64::from).collect()
}

pub fn fixture_grid() -> Grid {
    Grid::new(axis(), axis()).unwrap()
}

pub fn fixture_field(offset: f64) -> Array3<f64> {
    Array3::from_shape_fn((1, 5, 5), |(_, r, c)| FIXTURE_ROWS[r][c] + offset)
}

pub fn bucket() -> DecadeMonth {
    DecadeMonth::new(2020, 1).unwrap()
}

/// Single-bucket dataset where every statistic equals the fixture field.
pub fn fixture_dataset() -> EnsembleStatistic {
    EnsembleStatistic::from_field(fixture_grid(), vec![bucket()], fixture_field(0.0), "FIXTURE")
        .unwrap()
}

/// One mid-January day of `year`, carrying the fixture field plus `offset`.
pub fn fixture_slab(year: i32, offset: f64) -> DailySlab {
    let date = NaiveDate::from_ymd_opt(year, 1, 15).unwrap();
    DailySlab::new(vec![date], axis(), axis(), fixture_field(offset)).unwrap()
}

/// Store with one entry per `(model, offset)`, each covering `years`.
pub fn memory_store(
    models: &[(&str, f64)],
    scenario: &str,
    years: std::ops::RangeInclusive<i32>,
) -> MemoryDatasetStore {
    models.iter().fold(MemoryDatasetStore::new(), |store, (model, offset)| {
        years.clone().fold(store, |store, year| {
            store.with_year(model, scenario, year, fixture_slab(year, *offset))
        })
    })
}

/// Write per-year JSON stores under `{base}/{model}/{scenario}/r1i1p1f1/`.
pub fn write_store_tree(
    base: &Path,
    model: &str,
    scenario: &str,
    variable: &str,
    years: std::ops::RangeInclusive<i32>,
    offset: f64,
) {
    let member = base.join(model).join(scenario).join("r1i1p1f1");
    std::fs::create_dir_all(&member).unwrap();
    let field = fixture_field(offset);
    let plane: Vec<Vec<f64>> = field
        .index_axis(Axis(0), 0)
        .outer_iter()
        .map(|row| row.to_vec())
        .collect();
    for year in years {
        let doc = json!({
            "time": [format!("{}-01-15", year)],
            "y": axis(),
            "x": axis(),
            "values": [plane],
        });
        let name = format!(
            "{}_day_{}_{}_r1i1p1f1_gn_{}.json",
            variable, model, scenario, year
        );
        std::fs::write(member.join(name), doc.to_string()).unwrap();
    }
}

pub fn power_tags(feature_type: &str) -> FeatureTags {
    FeatureTags {
        category: "power".to_string(),
        feature_type: Some(feature_type.to_string()),
        ..Default::default()
    }
}

pub fn tower(id: i64, x: f64, y: f64) -> VectorFeature {
    VectorFeature::new(id, point!(x: x, y: y), power_tags("tower"))
}

pub fn power_line(id: i64, coords: &[(f64, f64)]) -> VectorFeature {
    let line: geo::LineString<f64> = coords.iter().copied().collect::<Vec<_>>().into();
    VectorFeature::new(id, line, power_tags("line"))
}

/// Axis-aligned square substation with its lower-left corner at `(x, y)`.
pub fn substation(id: i64, x: f64, y: f64, size: f64) -> VectorFeature {
    VectorFeature::new(
        id,
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ],
        power_tags("substation"),
    )
}

/// Horizontal two-vertex line through `y`.
pub fn horizontal_line(id: i64, x0: f64, x1: f64, y: f64) -> VectorFeature {
    VectorFeature::new(
        id,
        line_string![(x: x0, y: y), (x: x1, y: y)],
        power_tags("line"),
    )
}
