//! Cell coverage weights and weighted reductions.

use geo::{
    Area, BooleanOps, BoundingRect, EuclideanLength, MultiLineString, MultiPoint, MultiPolygon,
    Simplify,
};

use super::ZonalMethod;
use crate::climate::Grid;

/// Fraction of one cell covered by a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellWeight {
    pub row: usize,
    pub col: usize,
    pub weight: f64,
}

/// Area fraction of every cell the polygons overlap.
pub fn polygon_coverage(grid: &Grid, polygons: &MultiPolygon<f64>) -> Vec<CellWeight> {
    let Some(bbox) = polygons.bounding_rect() else {
        return Vec::new();
    };
    grid.cells_overlapping(&bbox)
        .filter_map(|(row, col)| {
            let cell = grid.cell_rect(row, col);
            let cell_area = cell.unsigned_area();
            if cell_area <= 0.0 {
                return None;
            }
            let cell = MultiPolygon::new(vec![cell.to_polygon()]);
            let weight = polygons.intersection(&cell).unsigned_area() / cell_area;
            (weight > 0.0).then_some(CellWeight { row, col, weight })
        })
        .collect()
}

/// Clipped length over cell width for every cell the lines cross.
pub fn line_coverage(grid: &Grid, lines: &MultiLineString<f64>) -> Vec<CellWeight> {
    let Some(bbox) = lines.bounding_rect() else {
        return Vec::new();
    };
    grid.cells_overlapping(&bbox)
        .filter_map(|(row, col)| {
            let cell = grid.cell_rect(row, col);
            let width = cell.width();
            if width <= 0.0 {
                return None;
            }
            let clipped = MultiPolygon::new(vec![cell.to_polygon()]).clip(lines, false);
            let weight = clipped.euclidean_length() / width;
            (weight > 0.0).then_some(CellWeight { row, col, weight })
        })
        .collect()
}

/// Nearest cell of each point; `None` for points off the grid.
pub fn point_cells(grid: &Grid, points: &MultiPoint<f64>) -> Vec<Option<(usize, usize)>> {
    points.iter().map(|p| grid.locate(p.x(), p.y())).collect()
}

/// Nearest cell of each line vertex after optional simplification.
///
/// Vertices off the grid are skipped.
pub fn vertex_cells(
    grid: &Grid,
    lines: &MultiLineString<f64>,
    tolerance: Option<f64>,
) -> Vec<(usize, usize)> {
    lines
        .iter()
        .flat_map(|line| match tolerance {
            Some(eps) if eps > 0.0 => line.simplify(&eps).0,
            _ => line.0.clone(),
        })
        .filter_map(|c| grid.locate(c.x, c.y))
        .collect()
}

/// Combine `(weight, value)` samples with `method`.
///
/// Non-finite values and non-positive weights are ignored. Returns NaN when
/// nothing remains.
pub fn weighted_reduce(method: ZonalMethod, samples: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let valid = samples
        .into_iter()
        .filter(|(w, v)| *w > 0.0 && v.is_finite());
    match method {
        ZonalMethod::Mean => {
            let (num, den) = valid.fold((0.0, 0.0), |(n, d), (w, v)| (n + w * v, d + w));
            if den > 0.0 {
                num / den
            } else {
                f64::NAN
            }
        }
        ZonalMethod::Sum => valid
            .fold(None, |acc: Option<f64>, (w, v)| {
                Some(acc.unwrap_or(0.0) + w * v)
            })
            .unwrap_or(f64::NAN),
        ZonalMethod::Max => valid.map(|(_, v)| v).fold(f64::NAN, f64::max),
        ZonalMethod::Min => valid.map(|(_, v)| v).fold(f64::NAN, f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};

    fn grid() -> Grid {
        let axis: Vec<f64> = (0..5).map(f64::from).collect();
        Grid::new(axis.clone(), axis).unwrap()
    }

    #[test]
    fn test_polygon_on_cell_centres_covers_four_quarters() {
        let square = polygon![
            (x: 2.0, y: 2.0),
            (x: 3.0, y: 2.0),
            (x: 3.0, y: 3.0),
            (x: 2.0, y: 3.0),
        ];
        let mut weights = polygon_coverage(&grid(), &MultiPolygon::new(vec![square]));
        weights.sort_by_key(|w| (w.row, w.col));
        let cells: Vec<_> = weights.iter().map(|w| (w.row, w.col)).collect();
        assert_eq!(cells, vec![(2, 2), (2, 3), (3, 2), (3, 3)]);
        for w in weights {
            assert!((w.weight - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_line_coverage_is_length_over_width() {
        let line = line_string![(x: 0.5, y: 1.0), (x: 2.5, y: 1.0)];
        let mut weights = line_coverage(&grid(), &MultiLineString::new(vec![line]));
        weights.sort_by_key(|w| w.col);
        assert_eq!(weights.len(), 2);
        assert_eq!((weights[0].row, weights[0].col), (1, 1));
        assert!((weights[0].weight - 1.0).abs() < 1e-9);
        assert!((weights[1].weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_reduce_methods() {
        let samples = [(0.25, 3000.0), (0.25, 4000.0), (0.25, 10.0), (0.25, 11.0)];
        assert_eq!(weighted_reduce(ZonalMethod::Mean, samples), 1755.25);
        assert_eq!(weighted_reduce(ZonalMethod::Max, samples), 4000.0);
        assert_eq!(weighted_reduce(ZonalMethod::Min, samples), 10.0);
        assert_eq!(weighted_reduce(ZonalMethod::Sum, samples), 1755.25);
    }

    #[test]
    fn test_weighted_reduce_ignores_nan() {
        let samples = [(1.0, f64::NAN), (1.0, 2.0)];
        assert_eq!(weighted_reduce(ZonalMethod::Mean, samples), 2.0);
        assert!(weighted_reduce(ZonalMethod::Max, [(1.0, f64::NAN)]).is_nan());
        assert!(weighted_reduce(ZonalMethod::Sum, []).is_nan());
    }

    #[test]
    fn test_off_grid_point_has_no_cell() {
        let points = MultiPoint::from(vec![(1.0, 1.0), (9.0, 9.0)]);
        assert_eq!(point_cells(&grid(), &points), vec![Some((1, 1)), None]);
    }
}
