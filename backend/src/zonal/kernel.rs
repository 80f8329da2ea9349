//! Per-feature aggregation kernels.

use super::coverage::{
    line_coverage, point_cells, polygon_coverage, vertex_cells, weighted_reduce, CellWeight,
};
use super::table::ZonalAggregationRecord;
use super::{LineStrategy, ZonalConfig, ZonalMethod};
use crate::climate::EnsembleStatistic;
use crate::models::{FeatureGeometry, Statistic, StatisticValues, VectorFeature};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("feature {feature_id}: {message}")]
pub struct KernelError {
    pub feature_id: i64,
    pub message: String,
}

impl KernelError {
    pub fn new(feature_id: i64, message: impl Into<String>) -> Self {
        Self {
            feature_id,
            message: message.into(),
        }
    }
}

/// Computes one record per time bucket for a single feature.
///
/// Kernels run concurrently on worker threads and must not hold mutable
/// state. Records whose statistics are undefined are filtered by the engine,
/// so kernels may return them.
pub trait ZonalKernel: Send + Sync {
    fn name(&self) -> &'static str;

    fn aggregate(
        &self,
        dataset: &EnsembleStatistic,
        feature: &VectorFeature,
        config: &ZonalConfig,
    ) -> Result<Vec<ZonalAggregationRecord>, KernelError>;
}

/// Nearest-cell sampling for points and exact coverage weighting for lines
/// and polygons.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageKernel;

impl CoverageKernel {
    fn weighted(
        dataset: &EnsembleStatistic,
        feature_id: i64,
        weights: &[CellWeight],
        method: ZonalMethod,
    ) -> Vec<ZonalAggregationRecord> {
        records_for(dataset, feature_id, |bucket, stat| {
            weighted_reduce(
                method,
                weights
                    .iter()
                    .map(|w| (w.weight, dataset.value(stat, bucket, w.row, w.col))),
            )
        })
    }

    /// Vertex samples combine per column: spread-free statistics average,
    /// lower bounds take the minimum and upper bounds the maximum.
    fn vertices(
        dataset: &EnsembleStatistic,
        feature_id: i64,
        cells: &[(usize, usize)],
    ) -> Vec<ZonalAggregationRecord> {
        records_for(dataset, feature_id, |bucket, stat| {
            let method = match stat {
                Statistic::Mean | Statistic::Median | Statistic::StdDev => ZonalMethod::Mean,
                Statistic::Min | Statistic::Q1 => ZonalMethod::Min,
                Statistic::Max | Statistic::Q3 => ZonalMethod::Max,
            };
            weighted_reduce(
                method,
                cells
                    .iter()
                    .map(|(r, c)| (1.0, dataset.value(stat, bucket, *r, *c))),
            )
        })
    }
}

impl ZonalKernel for CoverageKernel {
    fn name(&self) -> &'static str {
        "coverage"
    }

    fn aggregate(
        &self,
        dataset: &EnsembleStatistic,
        feature: &VectorFeature,
        config: &ZonalConfig,
    ) -> Result<Vec<ZonalAggregationRecord>, KernelError> {
        let grid = dataset.grid();
        let records = match &feature.geometry {
            FeatureGeometry::Point(points) => {
                if points.0.is_empty() {
                    return Err(KernelError::new(feature.id, "point geometry has no parts"));
                }
                let cells = point_cells(grid, points);
                records_for(dataset, feature.id, |bucket, stat| {
                    // An off-grid part samples NaN and is ignored by the reduction.
                    weighted_reduce(
                        config.method,
                        cells.iter().map(|cell| match cell {
                            Some((r, c)) => (1.0, dataset.value(stat, bucket, *r, *c)),
                            None => (1.0, f64::NAN),
                        }),
                    )
                })
            }
            FeatureGeometry::Line(lines) => match config.line_strategy {
                LineStrategy::Coverage => {
                    let weights = line_coverage(grid, lines);
                    Self::weighted(dataset, feature.id, &weights, config.method)
                }
                LineStrategy::Vertices => {
                    let cells = vertex_cells(grid, lines, config.vertex_tolerance);
                    Self::vertices(dataset, feature.id, &cells)
                }
            },
            FeatureGeometry::Polygon(polygons) => {
                let weights = polygon_coverage(grid, polygons);
                Self::weighted(dataset, feature.id, &weights, config.method)
            }
        };
        Ok(records)
    }
}

fn records_for(
    dataset: &EnsembleStatistic,
    feature_id: i64,
    value: impl Fn(usize, Statistic) -> f64,
) -> Vec<ZonalAggregationRecord> {
    dataset
        .buckets()
        .iter()
        .enumerate()
        .map(|(b, bucket)| {
            let mut values = StatisticValues::undefined();
            for stat in Statistic::ALL {
                values.set(stat, value(b, stat));
            }
            ZonalAggregationRecord::new(feature_id, *bucket, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::Grid;
    use crate::models::{DecadeMonth, FeatureTags};
    use geo::{line_string, point, polygon};
    use ndarray::Array3;

    fn fixture() -> EnsembleStatistic {
        let rows = [
            [10.0, 20.0, 30.0, 40.0, 50.0],
            [100.0, 200.0, 300.0, 400.0, 500.0],
            [1000.0, 2000.0, 3000.0, 4000.0, 5000.0],
            [8.0, 9.0, 10.0, 11.0, 12.0],
            [13.0, 14.0, 17.0, 16.0, 17.0],
        ];
        let values = Array3::from_shape_fn((1, 5, 5), |(_, r, c)| rows[r][c]);
        let axis: Vec<f64> = (0..5).map(f64::from).collect();
        EnsembleStatistic::from_field(
            Grid::new(axis.clone(), axis).unwrap(),
            vec![DecadeMonth::new(2020, 1).unwrap()],
            values,
            "fixture",
        )
        .unwrap()
    }

    fn run(geometry: FeatureGeometry, config: &ZonalConfig) -> StatisticValues {
        let feature = VectorFeature::new(1, geometry, FeatureTags::default());
        let records = CoverageKernel.aggregate(&fixture(), &feature, config).unwrap();
        assert_eq!(records.len(), 1);
        records[0].values
    }

    #[test]
    fn test_point_samples_nearest_cell_for_every_method() {
        for method in [ZonalMethod::Mean, ZonalMethod::Max, ZonalMethod::Min, ZonalMethod::Sum] {
            let config = ZonalConfig::default().with_method(method);
            let values = run(point!(x: 1.0, y: 1.0).into(), &config);
            assert_eq!(values.get(Statistic::Mean), 200.0);
        }
    }

    #[test]
    fn test_polygon_max_and_mean() {
        let square: FeatureGeometry =
            polygon![(x: 2.0, y: 2.0), (x: 3.0, y: 2.0), (x: 3.0, y: 3.0), (x: 2.0, y: 3.0)].into();
        let max = run(square.clone(), &ZonalConfig::default().with_method(ZonalMethod::Max));
        assert_eq!(max.get(Statistic::Mean), 4000.0);
        let mean = run(square, &ZonalConfig::default().with_method(ZonalMethod::Mean));
        assert!((mean.get(Statistic::Mean) - 1755.25).abs() < 1e-6);
    }

    #[test]
    fn test_line_vertices_combine_per_column() {
        let line: FeatureGeometry = line_string![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 3.0),
        ]
        .into();
        let config = ZonalConfig::default().with_line_strategy(LineStrategy::Vertices);
        let values = run(line, &config);
        assert_eq!(values.get(Statistic::Mean), 805.0);
        assert_eq!(values.get(Statistic::Min), 10.0);
        assert_eq!(values.get(Statistic::Max), 3000.0);
        assert_eq!(values.get(Statistic::Q1), 10.0);
        assert_eq!(values.get(Statistic::Q3), 3000.0);
    }

    #[test]
    fn test_off_grid_point_is_undefined() {
        let values = run(point!(x: 40.0, y: 40.0).into(), &ZonalConfig::default());
        assert!(!values.is_defined());
    }
}
