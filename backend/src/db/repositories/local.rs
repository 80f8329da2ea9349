//! In-memory repository for unit testing and local development.
//!
//! Shards, variables and fact rows live behind one lock. A load works on a
//! copy of the exposure state and swaps it in only when every step
//! succeeded, which gives the same all-or-nothing behaviour as the
//! Postgres transaction.

use async_trait::async_trait;
use geo::{Centroid, Intersects, MultiPolygon, Point};
use log::{debug, info};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::db::repository::{
    ErrorContext, ExposureRepository, FeatureRepository, RepositoryError, RepositoryResult,
};
use crate::load::{LoadBatch, LoadSummary, VariableDefinition};
use crate::models::{FeatureCollection, FeatureGeometry, VectorFeature};
use crate::query::{CatalogEntry, FeatureQuery, FeatureStoreLayout, SchemaRegistry};

#[derive(Debug, Clone, Default)]
struct LocalShard {
    has_subtype: bool,
    features: Vec<VectorFeature>,
}

#[derive(Debug, Clone)]
struct AdminArea {
    admin_level: i32,
    name: String,
    area: MultiPolygon<f64>,
}

/// Fact table key: `(feature_id, decade, month, variable_id)`.
type ExposureKey = (i64, i32, i32, i32);

#[derive(Debug, Clone, Default)]
struct ExposureState {
    variables: Vec<VariableDefinition>,
    exposures: BTreeMap<ExposureKey, f64>,
}

impl ExposureState {
    fn variable_id(&self, name: &str, scenario: &str) -> Option<i32> {
        self.variables
            .iter()
            .find(|v| v.variable_name == name && v.scenario == scenario)
            .map(|v| v.variable_id)
    }
}

#[derive(Debug, Default)]
struct LocalData {
    shards: BTreeMap<String, LocalShard>,
    admin_areas: Vec<AdminArea>,
    exposure: ExposureState,
    fail_next_load: Option<String>,
}

/// In-memory repository implementation.
#[derive(Debug, Default)]
pub struct LocalRepository {
    data: RwLock<LocalData>,
}

impl LocalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shard (if needed) and append features to it.
    ///
    /// `table` follows the store convention, e.g. `power_line`.
    pub fn insert_features(
        &self,
        table: impl Into<String>,
        has_subtype: bool,
        features: impl IntoIterator<Item = VectorFeature>,
    ) {
        let mut data = self.data.write();
        let shard = data.shards.entry(table.into()).or_default();
        shard.has_subtype = has_subtype;
        shard.features.extend(features);
    }

    /// Register an administrative boundary used by admin joins.
    pub fn insert_admin_area(
        &self,
        admin_level: i32,
        name: impl Into<String>,
        area: impl Into<MultiPolygon<f64>>,
    ) {
        self.data.write().admin_areas.push(AdminArea {
            admin_level,
            name: name.into(),
            area: area.into(),
        });
    }

    /// Make the next load fail after staging, before anything is committed.
    pub fn fail_next_load(&self, reason: impl Into<String>) {
        self.data.write().fail_next_load = Some(reason.into());
    }

    /// All stored variables in insertion order.
    pub fn variables(&self) -> Vec<VariableDefinition> {
        self.data.read().exposure.variables.clone()
    }

    /// Total fact rows across all variables.
    pub fn exposure_count(&self) -> usize {
        self.data.read().exposure.exposures.len()
    }

    fn matches(feature: &VectorFeature, query: &FeatureQuery, filter_subtypes: bool) -> bool {
        let type_ok = feature
            .tags
            .feature_type
            .as_ref()
            .is_some_and(|t| query.types.contains(t));
        let subtype_ok = !filter_subtypes
            || feature
                .tags
                .subtype
                .as_ref()
                .is_some_and(|s| query.subtypes.contains(s));
        let region_ok = query
            .region
            .as_ref()
            .map_or(true, |r| intersects_area(&feature.geometry, &r.to_multipolygon()));
        type_ok && subtype_ok && region_ok
    }
}

fn intersects_area(geometry: &FeatureGeometry, area: &MultiPolygon<f64>) -> bool {
    match geometry {
        FeatureGeometry::Point(points) => points.intersects(area),
        FeatureGeometry::Line(lines) => lines.intersects(area),
        FeatureGeometry::Polygon(polygons) => polygons.intersects(area),
    }
}

fn centroid(geometry: &FeatureGeometry) -> Option<Point<f64>> {
    match geometry {
        FeatureGeometry::Point(points) => points.centroid(),
        FeatureGeometry::Line(lines) => lines.centroid(),
        FeatureGeometry::Polygon(polygons) => polygons.centroid(),
    }
}

#[async_trait]
impl FeatureRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(true)
    }

    async fn load_schema_registry(
        &self,
        layout: &FeatureStoreLayout,
    ) -> RepositoryResult<SchemaRegistry> {
        let entries: Vec<CatalogEntry> = self
            .data
            .read()
            .shards
            .iter()
            .map(|(name, shard)| CatalogEntry::new(name.clone(), shard.has_subtype))
            .collect();
        let (registry, drift) = SchemaRegistry::from_catalog(layout.clone(), entries);
        debug!(
            "Local feature store: {} shard(s), {} drifted table(s)",
            registry.len(),
            drift.len()
        );
        Ok(registry)
    }

    async fn fetch_feature_collection(
        &self,
        registry: &SchemaRegistry,
        query: &FeatureQuery,
    ) -> RepositoryResult<FeatureCollection> {
        if query.types.is_empty() {
            return Err(RepositoryError::validation_with_context(
                "At least one feature type is required",
                ErrorContext::new("fetch_feature_collection").with_entity(query.category.clone()),
            ));
        }
        let data = self.data.read();
        let mut features = Vec::new();
        for handle in registry.tables_for(&query.category, &query.kinds) {
            let Some(shard) = data.shards.get(&handle.table) else {
                continue;
            };
            let filter_subtypes = handle.has_subtype_column && !query.subtypes.is_empty();
            for feature in shard
                .features
                .iter()
                .filter(|f| Self::matches(f, query, filter_subtypes))
            {
                let mut feature = feature.clone();
                if !handle.has_subtype_column {
                    feature.tags.subtype = None;
                }
                for join in &query.admin_joins {
                    let name = data
                        .admin_areas
                        .iter()
                        .find(|a| {
                            a.admin_level == join.admin_level()
                                && intersects_area(&feature.geometry, &a.area)
                        })
                        .map(|a| json!(a.name))
                        .unwrap_or(Value::Null);
                    feature.tags.properties.insert(join.property().to_string(), name);
                }
                if query.centroid {
                    if let Some(point) = centroid(&feature.geometry) {
                        feature.geometry = FeatureGeometry::from(point);
                    }
                }
                features.push(feature);
            }
        }
        Ok(FeatureCollection::from_features(&features))
    }
}

#[async_trait]
impl ExposureRepository for LocalRepository {
    async fn load_exposures(&self, batch: &LoadBatch) -> RepositoryResult<LoadSummary> {
        batch.tuning.validate().map_err(|e| {
            RepositoryError::validation_with_context(e, ErrorContext::new("load_exposures"))
        })?;

        let mut data = self.data.write();
        let mut work = data.exposure.clone();
        let mut summary = LoadSummary {
            staged_rows: batch.rows.len(),
            ..Default::default()
        };

        for variable in &batch.variables {
            if work
                .variable_id(&variable.variable_name, &variable.scenario)
                .is_none()
            {
                let variable_id = work.variables.len() as i32 + 1;
                work.variables.push(VariableDefinition {
                    variable_id,
                    variable_name: variable.variable_name.clone(),
                    scenario: variable.scenario.clone(),
                    metadata: variable.metadata.clone(),
                });
                summary.variables_created += 1;
            }
        }

        if let Some(reason) = data.fail_next_load.take() {
            return Err(RepositoryError::transaction(format!(
                "load rolled back: {}",
                reason
            )));
        }

        for row in &batch.rows {
            // Rows whose variable is unknown drop out, as with the SQL join.
            let Some(variable_id) = work.variable_id(&row.variable_name, &row.scenario) else {
                continue;
            };
            let key = (row.feature_id, row.decade, row.month, variable_id);
            if let std::collections::btree_map::Entry::Vacant(slot) = work.exposures.entry(key) {
                slot.insert(row.value);
                summary.inserted_rows += 1;
            }
        }

        data.exposure = work;
        info!(
            "Loaded {} of {} staged row(s), {} new variable(s)",
            summary.inserted_rows, summary.staged_rows, summary.variables_created
        );
        Ok(summary)
    }

    async fn get_variable(
        &self,
        variable_name: &str,
        scenario: &str,
    ) -> RepositoryResult<Option<VariableDefinition>> {
        Ok(self
            .data
            .read()
            .exposure
            .variables
            .iter()
            .find(|v| v.variable_name == variable_name && v.scenario == scenario)
            .cloned())
    }

    async fn count_exposures(&self, variable_id: i32) -> RepositoryResult<usize> {
        Ok(self
            .data
            .read()
            .exposure
            .exposures
            .keys()
            .filter(|k| k.3 == variable_id)
            .count())
    }
}
