//! Ensemble reduction.
//!
//! For each candidate model the reducer checks scenario availability and
//! complete year coverage, bins the daily series into decade-month
//! climatologies, and then reduces across models cell by cell.

use log::{debug, info, warn};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::dataset::{Climatology, EnsembleStatistic};
use super::grid::Grid;
use super::stats::summarize;
use super::store::{DailySlab, DatasetStore, StoreError};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{DecadeMonth, Statistic};

/// Canonical year coverage a model must match exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Inclusive historical range
    #[serde(default = "default_historical_years")]
    pub historical_years: [i32; 2],
    /// Inclusive future range
    #[serde(default = "default_future_years")]
    pub future_years: [i32; 2],
}

fn default_historical_years() -> [i32; 2] {
    [1950, 2014]
}

fn default_future_years() -> [i32; 2] {
    [2015, 2100]
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            historical_years: default_historical_years(),
            future_years: default_future_years(),
        }
    }
}

impl ReducerConfig {
    /// True when `years` equals one canonical range exactly.
    pub fn is_complete(&self, years: &BTreeSet<i32>) -> bool {
        [self.historical_years, self.future_years]
            .iter()
            .any(|[first, last]| {
                first <= last
                    && years.len() == (last - first + 1) as usize
                    && years.iter().copied().eq(*first..=*last)
            })
    }
}

/// What to reduce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleRequest {
    pub variable: String,
    pub scenario: String,
}

impl EnsembleRequest {
    pub fn new(variable: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            scenario: scenario.into(),
        }
    }
}

/// Why a candidate model was left out of the ensemble.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    MissingScenario { model: String, scenario: String },
    IncompleteYears {
        model: String,
        found: usize,
        first: Option<i32>,
        last: Option<i32>,
    },
    GridMismatch { model: String },
    Unreadable { model: String, message: String },
}

impl ValidationFailure {
    pub fn model(&self) -> &str {
        match self {
            ValidationFailure::MissingScenario { model, .. }
            | ValidationFailure::IncompleteYears { model, .. }
            | ValidationFailure::GridMismatch { model }
            | ValidationFailure::Unreadable { model, .. } => model,
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::MissingScenario { model, scenario } => {
                write!(f, "model {} has no {} scenario", model, scenario)
            }
            ValidationFailure::IncompleteYears {
                model,
                found,
                first,
                last,
            } => write!(
                f,
                "model {} has incomplete years ({} found, range {:?}..{:?})",
                model, found, first, last
            ),
            ValidationFailure::GridMismatch { model } => {
                write!(f, "model {} uses a different grid than the ensemble", model)
            }
            ValidationFailure::Unreadable { model, message } => {
                write!(f, "model {} could not be read: {}", model, message)
            }
        }
    }
}

/// Reduction result plus the models that were skipped.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub statistic: EnsembleStatistic,
    pub skipped: Vec<ValidationFailure>,
}

/// Running per-bucket sums for one model.
struct ClimatologyAccumulator {
    grid: Option<Grid>,
    sums: BTreeMap<DecadeMonth, (Array2<f64>, Array2<u32>)>,
}

impl ClimatologyAccumulator {
    fn new() -> Self {
        Self {
            grid: None,
            sums: BTreeMap::new(),
        }
    }

    /// Add a year of daily values. Fails if the grid changes between years.
    fn add(&mut self, slab: &DailySlab) -> bool {
        match &self.grid {
            Some(grid) if *grid != slab.grid => return false,
            Some(_) => {}
            None => self.grid = Some(slab.grid.clone()),
        }
        let shape = slab.grid.shape();
        for (t, date) in slab.dates.iter().enumerate() {
            let (sum, count) = self
                .sums
                .entry(DecadeMonth::from_date(*date))
                .or_insert_with(|| (Array2::zeros(shape), Array2::zeros(shape)));
            let plane = slab.values.index_axis(ndarray::Axis(0), t);
            ndarray::Zip::from(sum)
                .and(count)
                .and(&plane)
                .for_each(|s, n, v| {
                    if v.is_finite() {
                        *s += *v;
                        *n += 1;
                    }
                });
        }
        true
    }

    fn finish(self, model: &str) -> Option<Climatology> {
        let grid = self.grid?;
        let (ny, nx) = grid.shape();
        let buckets: Vec<DecadeMonth> = self.sums.keys().copied().collect();
        let mut values = ndarray::Array3::from_elem((buckets.len(), ny, nx), f64::NAN);
        for (b, (sum, count)) in self.sums.values().enumerate() {
            ndarray::Zip::from(values.index_axis_mut(ndarray::Axis(0), b))
                .and(sum)
                .and(count)
                .for_each(|out, s, n| {
                    if *n > 0 {
                        *out = *s / *n as f64;
                    }
                });
        }
        Some(Climatology {
            model: model.to_string(),
            grid,
            buckets,
            values,
        })
    }
}

/// Stack climatologies along a model axis and summarize every cell.
///
/// Bucket sets are unioned; a model missing a bucket contributes nothing to
/// that bucket. All climatologies must share one grid.
pub fn reduce_climatologies(climatologies: &[Climatology]) -> Option<EnsembleStatistic> {
    let first = climatologies.first()?;
    let grid = first.grid.clone();
    let (ny, nx) = grid.shape();

    let buckets: Vec<DecadeMonth> = climatologies
        .iter()
        .flat_map(|c| c.buckets.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // Per model, map each output bucket to the model's own bucket index.
    let lookup: Vec<Vec<Option<usize>>> = climatologies
        .iter()
        .map(|c| {
            buckets
                .iter()
                .map(|b| c.buckets.binary_search(b).ok())
                .collect()
        })
        .collect();

    let mut values = Array4::from_elem((Statistic::ALL.len(), buckets.len(), ny, nx), f64::NAN);
    let mut samples = Vec::with_capacity(climatologies.len());
    for b in 0..buckets.len() {
        for r in 0..ny {
            for c in 0..nx {
                samples.clear();
                samples.extend(
                    climatologies
                        .iter()
                        .zip(&lookup)
                        .filter_map(|(clim, idx)| idx[b].map(|i| clim.values[[i, r, c]])),
                );
                if let Some(summary) = summarize(&mut samples) {
                    for (stat, v) in summary.iter() {
                        values[[stat.index(), b, r, c]] = v;
                    }
                }
            }
        }
    }

    let models = climatologies.iter().map(|c| c.model.clone()).collect();
    EnsembleStatistic::new(grid, buckets, values, models).ok()
}

/// Discovers, validates and reduces ensemble members.
#[derive(Debug, Clone, Default)]
pub struct EnsembleReducer {
    config: ReducerConfig,
}

impl EnsembleReducer {
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    /// Reduce every valid model for the request.
    ///
    /// Invalid models are skipped with a warning. Fails with
    /// [`PipelineError::EmptyEnsemble`] when none remain.
    pub async fn reduce(
        &self,
        store: &dyn DatasetStore,
        request: &EnsembleRequest,
    ) -> PipelineResult<EnsembleOutcome> {
        let models = store
            .list_models()
            .await
            .map_err(|e| PipelineError::store("list_models", e))?;
        info!(
            "Reducing {} for {} across {} candidate model(s)",
            request.variable,
            request.scenario,
            models.len()
        );

        let mut climatologies: Vec<Climatology> = Vec::new();
        let mut skipped = Vec::new();
        for model in &models {
            let result = match self.climatology_for(store, model, request).await {
                Ok(clim) => match climatologies.first() {
                    Some(first) if first.grid != clim.grid => Err(ValidationFailure::GridMismatch {
                        model: model.clone(),
                    }),
                    _ => Ok(clim),
                },
                Err(failure) => Err(failure),
            };
            match result {
                Ok(clim) => {
                    debug!("Model {} contributes {} buckets", model, clim.buckets.len());
                    climatologies.push(clim);
                }
                Err(failure) => {
                    warn!("Skipping ensemble member: {}", failure);
                    skipped.push(failure);
                }
            }
        }

        let statistic = reduce_climatologies(&climatologies).ok_or_else(|| {
            PipelineError::empty_ensemble(&request.variable, &request.scenario, models.len())
        })?;
        info!(
            "Ensemble for {}/{} built from {} of {} model(s)",
            request.variable,
            request.scenario,
            statistic.sample_size(),
            models.len()
        );
        Ok(EnsembleOutcome { statistic, skipped })
    }

    async fn climatology_for(
        &self,
        store: &dyn DatasetStore,
        model: &str,
        request: &EnsembleRequest,
    ) -> Result<Climatology, ValidationFailure> {
        let unreadable = |e: StoreError| ValidationFailure::Unreadable {
            model: model.to_string(),
            message: e.to_string(),
        };

        if !store
            .has_scenario(model, &request.scenario)
            .await
            .map_err(unreadable)?
        {
            return Err(ValidationFailure::MissingScenario {
                model: model.to_string(),
                scenario: request.scenario.clone(),
            });
        }

        let stores = store
            .list_year_stores(model, &request.scenario, &request.variable)
            .await
            .map_err(unreadable)?;
        let years: BTreeSet<i32> = stores.iter().map(|s| s.year).collect();
        if !self.config.is_complete(&years) {
            return Err(ValidationFailure::IncompleteYears {
                model: model.to_string(),
                found: years.len(),
                first: years.first().copied(),
                last: years.last().copied(),
            });
        }

        let mut acc = ClimatologyAccumulator::new();
        for year_store in &stores {
            let slab = store
                .open_year(year_store, &request.variable)
                .await
                .map_err(unreadable)?;
            if !acc.add(&slab) {
                return Err(ValidationFailure::GridMismatch {
                    model: model.to_string(),
                });
            }
        }
        acc.finish(model).ok_or_else(|| ValidationFailure::Unreadable {
            model: model.to_string(),
            message: "no data".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn climatology(model: &str, value: f64) -> Climatology {
        Climatology {
            model: model.to_string(),
            grid: Grid::new(vec![0.0, 1.0], vec![0.0]).unwrap(),
            buckets: vec![DecadeMonth::new(2050, 1).unwrap()],
            values: Array3::from_elem((1, 1, 2), value),
        }
    }

    #[test]
    fn test_year_sets_compare_by_equality() {
        let config = ReducerConfig {
            historical_years: [2000, 2002],
            future_years: [2003, 2005],
        };
        assert!(config.is_complete(&[2000, 2001, 2002].into_iter().collect()));
        assert!(config.is_complete(&[2003, 2004, 2005].into_iter().collect()));
        assert!(!config.is_complete(&[2000, 2002].into_iter().collect()));
        assert!(!config.is_complete(&[2000, 2001, 2002, 2003].into_iter().collect()));
        assert!(!config.is_complete(&BTreeSet::new()));
    }

    #[test]
    fn test_reduce_climatologies_statistics() {
        let clims = vec![
            climatology("a", 1.0),
            climatology("b", 2.0),
            climatology("c", 3.0),
            climatology("d", 4.0),
        ];
        let stat = reduce_climatologies(&clims).unwrap();
        assert_eq!(stat.sample_size(), 4);
        assert_eq!(stat.value(Statistic::Mean, 0, 0, 0), 2.5);
        assert_eq!(stat.value(Statistic::Median, 0, 0, 0), 2.5);
        assert_eq!(stat.value(Statistic::Q1, 0, 0, 0), 1.75);
        assert_eq!(stat.value(Statistic::Q3, 0, 0, 0), 3.25);
        assert_eq!(stat.value(Statistic::Min, 0, 0, 1), 1.0);
        assert_eq!(stat.value(Statistic::Max, 0, 0, 1), 4.0);
        assert!((stat.value(Statistic::StdDev, 0, 0, 0) - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(stat.quartiles_ordered());
    }

    #[test]
    fn test_reduce_unions_buckets() {
        let mut late = climatology("late", 10.0);
        late.buckets = vec![DecadeMonth::new(2060, 1).unwrap()];
        let stat = reduce_climatologies(&[climatology("early", 1.0), late]).unwrap();
        assert_eq!(stat.buckets().len(), 2);
        assert_eq!(stat.value(Statistic::Mean, 0, 0, 0), 1.0);
        assert_eq!(stat.value(Statistic::Mean, 1, 0, 0), 10.0);
    }

    #[test]
    fn test_reduce_nothing_is_none() {
        assert!(reduce_climatologies(&[]).is_none());
    }
}
