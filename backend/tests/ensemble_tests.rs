//! Ensemble discovery, validation and reduction.

mod support;

use chrono::NaiveDate;
use exposure_rust::climate::ensemble::reduce_climatologies;
use exposure_rust::climate::store::ENSEMBLE_DIR;
use exposure_rust::climate::{
    Climatology, DailySlab, EnsembleReducer, EnsembleRequest, Grid, LocalDatasetStore,
    ReducerConfig, ValidationFailure,
};
use exposure_rust::error::PipelineError;
use exposure_rust::models::{DecadeMonth, Statistic};
use ndarray::Array3;
use proptest::prelude::*;

fn reducer() -> EnsembleReducer {
    EnsembleReducer::new(ReducerConfig {
        historical_years: [1950, 2014],
        future_years: [2050, 2051],
    })
}

#[tokio::test]
async fn test_reduce_skips_invalid_members() {
    let store = support::memory_store(
        &[("MODEL-A", 0.0), ("MODEL-B", 10.0), ("MODEL-C", 20.0)],
        "ssp245",
        2050..=2051,
    )
    .with_model("MODEL-D")
    .with_year("MODEL-E", "ssp245", 2050, support::fixture_slab(2050, 0.0));

    let outcome = reducer()
        .reduce(&store, &EnsembleRequest::new("tasmax", "ssp245"))
        .await
        .unwrap();

    let stat = &outcome.statistic;
    assert_eq!(stat.sample_size(), 3);
    assert_eq!(stat.models_included(), &["MODEL-A", "MODEL-B", "MODEL-C"]);
    assert_eq!(stat.buckets(), &[DecadeMonth::new(2050, 1).unwrap()]);
    assert_eq!(stat.value(Statistic::Mean, 0, 1, 1), 210.0);
    assert_eq!(stat.value(Statistic::Median, 0, 1, 1), 210.0);
    assert_eq!(stat.value(Statistic::Min, 0, 1, 1), 200.0);
    assert_eq!(stat.value(Statistic::Max, 0, 1, 1), 220.0);
    assert_eq!(stat.value(Statistic::Q1, 0, 1, 1), 205.0);
    assert_eq!(stat.value(Statistic::Q3, 0, 1, 1), 215.0);
    assert!((stat.value(Statistic::StdDev, 0, 1, 1) - (200.0f64 / 3.0).sqrt()).abs() < 1e-9);
    assert!(stat.quartiles_ordered());

    assert_eq!(outcome.skipped.len(), 2);
    assert!(matches!(
        &outcome.skipped[0],
        ValidationFailure::MissingScenario { model, .. } if model == "MODEL-D"
    ));
    assert!(matches!(
        &outcome.skipped[1],
        ValidationFailure::IncompleteYears { model, found: 1, .. } if model == "MODEL-E"
    ));
}

#[tokio::test]
async fn test_model_on_a_different_grid_is_skipped() {
    let shifted: Vec<f64> = (0..5).map(|i| f64::from(i) + 0.5).collect();
    let store = (2050..=2051).fold(
        support::memory_store(&[("MODEL-A", 0.0)], "ssp245", 2050..=2051),
        |store, year| {
            let date = NaiveDate::from_ymd_opt(year, 1, 15).unwrap();
            let slab = DailySlab::new(
                vec![date],
                support::axis(),
                shifted.clone(),
                support::fixture_field(0.0),
            )
            .unwrap();
            store.with_year("MODEL-Z", "ssp245", year, slab)
        },
    );

    let outcome = reducer()
        .reduce(&store, &EnsembleRequest::new("tasmax", "ssp245"))
        .await
        .unwrap();
    assert_eq!(outcome.statistic.sample_size(), 1);
    assert_eq!(
        outcome.skipped,
        vec![ValidationFailure::GridMismatch {
            model: "MODEL-Z".to_string()
        }]
    );
}

#[tokio::test]
async fn test_no_valid_member_is_an_error() {
    let store = support::memory_store(&[("MODEL-A", 0.0)], "ssp585", 2050..=2051);
    let err = reducer()
        .reduce(&store, &EnsembleRequest::new("tasmax", "ssp245"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyEnsemble { .. }));
}

#[tokio::test]
async fn test_reduce_from_store_tree() {
    let dir = tempfile::tempdir().unwrap();
    support::write_store_tree(dir.path(), "MODEL-A", "ssp245", "tasmax", 2050..=2051, 0.0);
    support::write_store_tree(dir.path(), "MODEL-B", "ssp245", "tasmax", 2050..=2051, 2.0);
    // An older ensemble output sitting in the tree is never a member.
    support::write_store_tree(dir.path(), ENSEMBLE_DIR, "ssp245", "tasmax", 2050..=2051, 99.0);
    // Another variable in the same member directory is ignored.
    support::write_store_tree(dir.path(), "MODEL-B", "ssp245", "pr", 2050..=2050, 5.0);

    let store = LocalDatasetStore::new(dir.path(), "json");
    let outcome = reducer()
        .reduce(&store, &EnsembleRequest::new("tasmax", "ssp245"))
        .await
        .unwrap();

    assert_eq!(outcome.statistic.models_included(), &["MODEL-A", "MODEL-B"]);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.statistic.value(Statistic::Mean, 0, 1, 1), 201.0);
    assert_eq!(outcome.statistic.value(Statistic::Max, 0, 2, 3), 4002.0);
}

#[tokio::test]
async fn test_store_tree_missing_year_is_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    support::write_store_tree(dir.path(), "MODEL-A", "ssp245", "tasmax", 2050..=2051, 0.0);
    support::write_store_tree(dir.path(), "MODEL-B", "ssp245", "tasmax", 2051..=2051, 0.0);

    let store = LocalDatasetStore::new(dir.path(), "json");
    let outcome = reducer()
        .reduce(&store, &EnsembleRequest::new("tasmax", "ssp245"))
        .await
        .unwrap();
    assert_eq!(outcome.statistic.sample_size(), 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].model(), "MODEL-B");
}

#[test]
fn test_normalize_and_subset_keep_statistics_aligned() {
    let lon: Vec<f64> = vec![0.0, 90.0, 180.0, 270.0];
    let values = Array3::from_shape_fn((1, 1, 4), |(_, _, c)| c as f64);
    let stat = exposure_rust::climate::EnsembleStatistic::from_field(
        Grid::new(lon, vec![0.0]).unwrap(),
        vec![DecadeMonth::new(2050, 1).unwrap()],
        values,
        "MODEL-A",
    )
    .unwrap()
    .normalize_longitudes()
    .unwrap();

    assert_eq!(stat.grid().x().centres(), &[-180.0, -90.0, 0.0, 90.0]);
    assert_eq!(stat.value(Statistic::Mean, 0, 0, 1), 3.0);

    let bbox = exposure_rust::models::BoundingBox::new(-100.0, -1.0, 10.0, 1.0).unwrap();
    let subset = stat.subset(&bbox).unwrap();
    assert_eq!(subset.grid().x().centres(), &[-90.0, 0.0]);
    assert_eq!(subset.value(Statistic::Mean, 0, 0, 0), 3.0);
    assert_eq!(subset.sample_size(), 1);

    let far = exposure_rust::models::BoundingBox::new(100.0, 50.0, 120.0, 60.0).unwrap();
    assert!(stat.subset(&far).is_none());
}

fn climatology(model: usize, values: &[f64]) -> Climatology {
    Climatology {
        model: format!("MODEL-{}", model),
        grid: Grid::new(vec![0.0, 1.0], vec![0.0]).unwrap(),
        buckets: vec![DecadeMonth::new(2050, 7).unwrap()],
        values: Array3::from_shape_vec((1, 1, 2), values.to_vec()).unwrap(),
    }
}

proptest! {
    #[test]
    fn prop_reduced_quartiles_are_ordered(
        members in prop::collection::vec(prop::array::uniform2(-1.0e4f64..1.0e4), 1..12)
    ) {
        let clims: Vec<Climatology> = members
            .iter()
            .enumerate()
            .map(|(i, v)| climatology(i, v))
            .collect();
        let stat = reduce_climatologies(&clims).unwrap();
        prop_assert_eq!(stat.sample_size(), members.len());
        prop_assert!(stat.quartiles_ordered());
        for col in 0..2 {
            let mean = stat.value(Statistic::Mean, 0, 0, col);
            prop_assert!(stat.value(Statistic::Min, 0, 0, col) <= mean + 1e-9);
            prop_assert!(mean <= stat.value(Statistic::Max, 0, 0, col) + 1e-9);
        }
    }
}
