//! Cell-centred rectilinear grids.
//!
//! Coordinates are cell centres in ascending order. Cell edges sit halfway
//! between neighbouring centres; the outermost cells extend by half of the
//! adjacent spacing.

use geo::{Coord, Rect};
use ndarray::{Array, Axis, RemoveAxis};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("{axis} axis is empty")]
    EmptyAxis { axis: &'static str },
    #[error("{axis} axis contains a non-finite coordinate")]
    NonFinite { axis: &'static str },
    #[error("{axis} axis is not strictly ascending at index {index}")]
    NotAscending { axis: &'static str, index: usize },
    #[error("Array shape {found:?} does not match grid shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// One axis of cell-centre coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    centres: Vec<f64>,
}

impl GridAxis {
    pub fn new(axis: &'static str, centres: Vec<f64>) -> Result<Self, GridError> {
        if centres.is_empty() {
            return Err(GridError::EmptyAxis { axis });
        }
        if centres.iter().any(|c| !c.is_finite()) {
            return Err(GridError::NonFinite { axis });
        }
        if let Some(index) = centres.windows(2).position(|w| w[1] <= w[0]) {
            return Err(GridError::NotAscending {
                axis,
                index: index + 1,
            });
        }
        Ok(Self { centres })
    }

    pub fn centres(&self) -> &[f64] {
        &self.centres
    }

    pub fn len(&self) -> usize {
        self.centres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centres.is_empty()
    }

    /// Lower and upper edge of cell `i`.
    pub fn cell_bounds(&self, i: usize) -> (f64, f64) {
        let c = &self.centres;
        let n = c.len();
        if n == 1 {
            return (c[0] - 0.5, c[0] + 0.5);
        }
        let lower = if i == 0 {
            c[0] - (c[1] - c[0]) / 2.0
        } else {
            (c[i - 1] + c[i]) / 2.0
        };
        let upper = if i == n - 1 {
            c[n - 1] + (c[n - 1] - c[n - 2]) / 2.0
        } else {
            (c[i] + c[i + 1]) / 2.0
        };
        (lower, upper)
    }

    /// Outer edges of the axis.
    pub fn extent(&self) -> (f64, f64) {
        (self.cell_bounds(0).0, self.cell_bounds(self.len() - 1).1)
    }

    /// Index of the cell containing `v`, i.e. the nearest centre, or `None`
    /// when `v` falls outside the axis extent.
    pub fn locate(&self, v: f64) -> Option<usize> {
        let (lo, hi) = self.extent();
        if !v.is_finite() || v < lo || v > hi {
            return None;
        }
        let idx = self.centres.partition_point(|c| *c < v);
        if idx == 0 {
            return Some(0);
        }
        if idx == self.len() {
            return Some(idx - 1);
        }
        if v - self.centres[idx - 1] <= self.centres[idx] - v {
            Some(idx - 1)
        } else {
            Some(idx)
        }
    }

    /// Cells whose extent touches the closed interval `[lo, hi]`.
    pub fn overlapping(&self, lo: f64, hi: f64) -> Range<usize> {
        let start = (0..self.len())
            .find(|&i| self.cell_bounds(i).1 >= lo)
            .unwrap_or(self.len());
        let end = (start..self.len())
            .find(|&i| self.cell_bounds(i).0 > hi)
            .unwrap_or(self.len());
        start..end
    }

    /// Indices of centres within the closed interval `[lo, hi]`.
    pub fn within(&self, lo: f64, hi: f64) -> Vec<usize> {
        self.centres
            .iter()
            .enumerate()
            .filter(|(_, c)| **c >= lo && **c <= hi)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Two-dimensional grid: rows follow `y`, columns follow `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    x: GridAxis,
    y: GridAxis,
}

impl Grid {
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self, GridError> {
        Ok(Self {
            x: GridAxis::new("x", x)?,
            y: GridAxis::new("y", y)?,
        })
    }

    pub fn x(&self) -> &GridAxis {
        &self.x
    }

    pub fn y(&self) -> &GridAxis {
        &self.y
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let (x0, x1) = self.x.cell_bounds(col);
        let (y0, y1) = self.y.cell_bounds(row);
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    /// `(row, col)` of the cell containing the point.
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        Some((self.y.locate(y)?, self.x.locate(x)?))
    }

    pub fn extent(&self) -> Rect<f64> {
        let (x0, x1) = self.x.extent();
        let (y0, y1) = self.y.extent();
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    /// All `(row, col)` cells touching `rect`.
    pub fn cells_overlapping(&self, rect: &Rect<f64>) -> impl Iterator<Item = (usize, usize)> {
        let rows = self.y.overlapping(rect.min().y, rect.max().y);
        let cols = self.x.overlapping(rect.min().x, rect.max().x);
        rows.flat_map(move |r| cols.clone().map(move |c| (r, c)))
    }
}

/// Reorder coordinates ascending, permuting `data` along `axis` to match.
pub(crate) fn sort_along<D: RemoveAxis>(
    coords: Vec<f64>,
    data: Array<f64, D>,
    axis: Axis,
) -> (Vec<f64>, Array<f64, D>) {
    let mut order: Vec<usize> = (0..coords.len()).collect();
    order.sort_by(|a, b| coords[*a].total_cmp(&coords[*b]));
    if order.iter().enumerate().all(|(i, o)| i == *o) {
        return (coords, data);
    }
    let sorted = order.iter().map(|i| coords[*i]).collect();
    (sorted, data.select(axis, &order))
}

/// Map a 0..360 longitude onto -180..180.
pub fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn unit_axis(n: usize) -> GridAxis {
        GridAxis::new("x", (0..n).map(|i| i as f64).collect()).unwrap()
    }

    #[test]
    fn test_cell_bounds_are_midpoints() {
        let axis = unit_axis(5);
        assert_eq!(axis.cell_bounds(0), (-0.5, 0.5));
        assert_eq!(axis.cell_bounds(2), (1.5, 2.5));
        assert_eq!(axis.extent(), (-0.5, 4.5));
    }

    #[test]
    fn test_locate_nearest_and_outside() {
        let axis = unit_axis(5);
        assert_eq!(axis.locate(1.2), Some(1));
        assert_eq!(axis.locate(1.7), Some(2));
        assert_eq!(axis.locate(4.4), Some(4));
        assert_eq!(axis.locate(4.6), None);
        assert_eq!(axis.locate(f64::NAN), None);
    }

    #[test]
    fn test_overlapping_is_inclusive_of_touching_cells() {
        let axis = unit_axis(5);
        assert_eq!(axis.overlapping(2.0, 3.0), 2..4);
        assert_eq!(axis.overlapping(2.0, 2.0), 2..3);
        assert_eq!(axis.overlapping(10.0, 12.0), 5..5);
    }

    #[test]
    fn test_rejects_unsorted_axis() {
        assert_eq!(
            GridAxis::new("y", vec![0.0, 2.0, 1.0]).unwrap_err(),
            GridError::NotAscending { axis: "y", index: 2 }
        );
        assert!(GridAxis::new("y", vec![]).is_err());
    }

    #[test]
    fn test_sort_along_permutes_data() {
        let data = array![[1.0, 2.0, 3.0]];
        let (coords, sorted) = sort_along(vec![3.0, 1.0, 2.0], data, Axis(1));
        assert_eq!(coords, vec![1.0, 2.0, 3.0]);
        assert_eq!(sorted, array![[2.0, 3.0, 1.0]]);
    }

    #[test]
    fn test_wrap_longitude() {
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(10.0), 10.0);
        assert_eq!(wrap_longitude(359.5), -0.5);
    }
}
