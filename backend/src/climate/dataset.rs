//! Reduced climate datasets.

use log::debug;
use ndarray::{s, Array3, Array4, ArrayView3, Axis};

use super::grid::{sort_along, wrap_longitude, Grid, GridError};
use crate::models::{BoundingBox, DecadeMonth, Statistic, StatisticValues};

/// One model's decade-month climatology, dimensioned `(bucket, y, x)`.
#[derive(Debug, Clone)]
pub struct Climatology {
    pub model: String,
    pub grid: Grid,
    pub buckets: Vec<DecadeMonth>,
    pub values: Array3<f64>,
}

/// Ensemble summary statistics keyed by `(bucket, y, x)`.
///
/// Values are stored as a single `(statistic, bucket, y, x)` array with the
/// statistic axis in [`Statistic::ALL`] order.
#[derive(Debug, Clone)]
pub struct EnsembleStatistic {
    grid: Grid,
    buckets: Vec<DecadeMonth>,
    values: Array4<f64>,
    sample_size: usize,
    models_included: Vec<String>,
}

impl EnsembleStatistic {
    pub fn new(
        grid: Grid,
        buckets: Vec<DecadeMonth>,
        values: Array4<f64>,
        models_included: Vec<String>,
    ) -> Result<Self, GridError> {
        let (ny, nx) = grid.shape();
        let expected = vec![Statistic::ALL.len(), buckets.len(), ny, nx];
        if values.shape() != expected.as_slice() {
            return Err(GridError::ShapeMismatch {
                expected,
                found: values.shape().to_vec(),
            });
        }
        Ok(Self {
            grid,
            buckets,
            values,
            sample_size: models_included.len(),
            models_included,
        })
    }

    /// Build a single-member dataset where every statistic equals `values`.
    ///
    /// Useful for fixtures and for sampling a raw field through the
    /// aggregation engine.
    pub fn from_field(
        grid: Grid,
        buckets: Vec<DecadeMonth>,
        values: Array3<f64>,
        model: &str,
    ) -> Result<Self, GridError> {
        let (nb, ny, nx) = values.dim();
        let stacked = Array4::from_shape_fn((Statistic::ALL.len(), nb, ny, nx), |(_, b, r, c)| {
            values[[b, r, c]]
        });
        Self::new(grid, buckets, stacked, vec![model.to_string()])
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn buckets(&self) -> &[DecadeMonth] {
        &self.buckets
    }

    /// Count of models that contributed to the reduction.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn models_included(&self) -> &[String] {
        &self.models_included
    }

    /// `(bucket, y, x)` view of one statistic.
    pub fn statistic(&self, stat: Statistic) -> ArrayView3<'_, f64> {
        self.values.index_axis(Axis(0), stat.index())
    }

    pub fn value(&self, stat: Statistic, bucket: usize, row: usize, col: usize) -> f64 {
        self.values[[stat.index(), bucket, row, col]]
    }

    /// All statistics at one cell.
    pub fn cell(&self, bucket: usize, row: usize, col: usize) -> StatisticValues {
        let mut out = StatisticValues::undefined();
        for stat in Statistic::ALL {
            out.set(stat, self.value(stat, bucket, row, col));
        }
        out
    }

    /// Re-express 0..360 longitudes as -180..180 and re-sort the columns.
    ///
    /// Columns that wrap onto an existing centre (0 and 360) are the same
    /// meridian; only the first in the original order is kept.
    pub fn normalize_longitudes(self) -> Result<Self, GridError> {
        if self.grid.x().centres().iter().all(|x| *x <= 180.0) {
            return Ok(self);
        }
        let x: Vec<f64> = self.grid.x().centres().iter().map(|x| wrap_longitude(*x)).collect();
        let (x, values) = sort_along(x, self.values, Axis(3));
        let keep: Vec<usize> = (0..x.len()).filter(|&i| i == 0 || x[i] != x[i - 1]).collect();
        let (x, values) = if keep.len() < x.len() {
            debug!("Dropped {} wrapped duplicate longitude column(s)", x.len() - keep.len());
            (keep.iter().map(|&i| x[i]).collect(), values.select(Axis(3), &keep))
        } else {
            (x, values)
        };
        let grid = Grid::new(x, self.grid.y().centres().to_vec())?;
        Ok(Self {
            grid,
            values,
            ..self
        })
    }

    /// Restrict to cells whose centres fall inside `bbox`.
    ///
    /// Returns `None` when the box excludes every cell.
    pub fn subset(&self, bbox: &BoundingBox) -> Option<Self> {
        let cols = self.grid.x().within(bbox.x_min, bbox.x_max);
        let rows = self.grid.y().within(bbox.y_min, bbox.y_max);
        if cols.is_empty() || rows.is_empty() {
            return None;
        }
        let x = cols.iter().map(|c| self.grid.x().centres()[*c]).collect();
        let y = rows.iter().map(|r| self.grid.y().centres()[*r]).collect();
        let grid = Grid::new(x, y).ok()?;
        let values = self
            .values
            .select(Axis(3), &cols)
            .select(Axis(2), &rows);
        Some(Self {
            grid,
            buckets: self.buckets.clone(),
            values,
            sample_size: self.sample_size,
            models_included: self.models_included.clone(),
        })
    }

    /// Check `min <= q1 <= median <= q3 <= max` wherever all are finite.
    pub fn quartiles_ordered(&self) -> bool {
        let (_, nb, ny, nx) = self.values.dim();
        (0..nb).all(|b| {
            (0..ny).all(|r| {
                (0..nx).all(|c| {
                    let cell = self.values.slice(s![.., b, r, c]);
                    if cell.iter().any(|v| !v.is_finite()) {
                        return true;
                    }
                    let v = |stat: Statistic| cell[stat.index()];
                    v(Statistic::Min) <= v(Statistic::Q1)
                        && v(Statistic::Q1) <= v(Statistic::Median)
                        && v(Statistic::Median) <= v(Statistic::Q3)
                        && v(Statistic::Q3) <= v(Statistic::Max)
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn dataset(x: Vec<f64>, y: Vec<f64>) -> EnsembleStatistic {
        let (ny, nx) = (y.len(), x.len());
        let values = Array3::from_shape_fn((1, ny, nx), |(_, r, c)| (r * 10 + c) as f64);
        EnsembleStatistic::from_field(
            Grid::new(x, y).unwrap(),
            vec![DecadeMonth::new(2020, 1).unwrap()],
            values,
            "fixture",
        )
        .unwrap()
    }

    #[test]
    fn test_from_field_sets_every_statistic() {
        let ds = dataset(vec![0.0, 1.0], vec![0.0, 1.0]);
        assert_eq!(ds.sample_size(), 1);
        for stat in Statistic::ALL {
            assert_eq!(ds.value(stat, 0, 1, 1), 11.0);
        }
    }

    #[test]
    fn test_subset_outside_extent_is_none() {
        let ds = dataset(vec![0.0, 1.0, 2.0], vec![0.0, 1.0]);
        let bbox = BoundingBox::new(50.0, 50.0, 60.0, 60.0).unwrap();
        assert!(ds.subset(&bbox).is_none());

        let bbox = BoundingBox::new(0.5, 0.0, 2.0, 1.0).unwrap();
        let sub = ds.subset(&bbox).unwrap();
        assert_eq!(sub.grid().x().centres(), &[1.0, 2.0]);
        assert_eq!(sub.value(Statistic::Mean, 0, 1, 0), 11.0);
    }

    #[test]
    fn test_normalize_longitudes_reorders_columns() {
        let ds = dataset(vec![90.0, 180.0, 270.0], vec![0.0]);
        let ds = ds.normalize_longitudes().unwrap();
        assert_eq!(ds.grid().x().centres(), &[-180.0, -90.0, 90.0]);
        assert_eq!(ds.value(Statistic::Mean, 0, 0, 0), 1.0);
        assert_eq!(ds.value(Statistic::Mean, 0, 0, 1), 2.0);
        assert_eq!(ds.value(Statistic::Mean, 0, 0, 2), 0.0);
    }

    #[test]
    fn test_normalize_longitudes_merges_wrapped_meridian() {
        let ds = dataset(vec![0.0, 90.0, 180.0, 270.0, 360.0], vec![0.0]);
        let ds = ds.normalize_longitudes().unwrap();
        assert_eq!(ds.grid().x().centres(), &[-180.0, -90.0, 0.0, 90.0]);
        // The 0 column wins over the 360 column.
        assert_eq!(ds.value(Statistic::Mean, 0, 0, 2), 0.0);
        assert_eq!(ds.value(Statistic::Mean, 0, 0, 1), 3.0);
    }
}
