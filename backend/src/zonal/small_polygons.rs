//! Replacement of small polygons by their centroid.
//!
//! A polygon much smaller than a grid cell gains nothing from coverage
//! weighting, so it is sampled as a point instead.

use geo::{Centroid, GeodesicArea};
use log::{debug, info};

use super::ThresholdBoundary;
use crate::models::{FeatureGeometry, VectorFeature};

/// Geodesic area in km² of a polygon feature, `None` for other kinds.
pub fn polygon_area_km2(feature: &VectorFeature) -> Option<f64> {
    match &feature.geometry {
        FeatureGeometry::Polygon(polygons) => Some(polygons.geodesic_area_unsigned() / 1.0e6),
        _ => None,
    }
}

/// Convert polygons below `threshold_km2` into centroid points.
///
/// Returns the features and the number converted. `None` or a non-positive
/// threshold disables conversion.
pub fn convert_small_polygons(
    features: Vec<VectorFeature>,
    threshold_km2: Option<f64>,
    boundary: ThresholdBoundary,
) -> (Vec<VectorFeature>, usize) {
    let Some(threshold) = threshold_km2.filter(|t| *t > 0.0) else {
        return (features, 0);
    };

    let mut converted = 0;
    let features = features
        .into_iter()
        .map(|mut feature| {
            let centroid = match (&feature.geometry, polygon_area_km2(&feature)) {
                (FeatureGeometry::Polygon(polygons), Some(area))
                    if boundary.is_below(area, threshold) =>
                {
                    polygons.centroid()
                }
                _ => None,
            };
            if let Some(point) = centroid {
                debug!("Feature {} sampled at its centroid", feature.id);
                feature.geometry = point.into();
                converted += 1;
            }
            feature
        })
        .collect();

    if converted > 0 {
        info!(
            "Converted {} small polygon(s) to points (area {} {} km²)",
            converted,
            match boundary {
                ThresholdBoundary::Exclusive => "<",
                ThresholdBoundary::Inclusive => "<=",
            },
            threshold
        );
    }
    (features, converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureTags, GeometryKind};
    use geo::polygon;

    fn square(id: i64, size: f64) -> VectorFeature {
        VectorFeature::new(
            id,
            polygon![(x: 0.0, y: 0.0), (x: size, y: 0.0), (x: size, y: size), (x: 0.0, y: size)],
            FeatureTags::default(),
        )
    }

    #[test]
    fn test_threshold_boundary_modes() {
        let feature = square(1, 0.1);
        let area = polygon_area_km2(&feature).unwrap();
        assert!(area > 100.0 && area < 150.0);

        let (kept, n) =
            convert_small_polygons(vec![feature.clone()], Some(area), ThresholdBoundary::Exclusive);
        assert_eq!(n, 0);
        assert_eq!(kept[0].geometry.kind(), GeometryKind::Polygon);

        let (converted, n) =
            convert_small_polygons(vec![feature], Some(area), ThresholdBoundary::Inclusive);
        assert_eq!(n, 1);
        assert_eq!(converted[0].geometry.kind(), GeometryKind::Point);
    }

    #[test]
    fn test_no_threshold_keeps_everything() {
        let (features, n) =
            convert_small_polygons(vec![square(1, 0.001)], None, ThresholdBoundary::Exclusive);
        assert_eq!(n, 0);
        assert_eq!(features[0].geometry.kind(), GeometryKind::Polygon);
    }

    #[test]
    fn test_only_small_polygons_convert() {
        let (features, n) = convert_small_polygons(
            vec![square(1, 0.001), square(2, 2.0)],
            Some(10.0),
            ThresholdBoundary::Exclusive,
        );
        assert_eq!(n, 1);
        assert_eq!(features[0].geometry.kind(), GeometryKind::Point);
        assert_eq!(features[1].geometry.kind(), GeometryKind::Polygon);
    }
}
