//! Parameterized FeatureCollection query rendering.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use super::registry::{quote_identifier, SchemaRegistry, TableHandle};
use crate::models::{BoundingRegion, GeometryKind};

pub const DEFAULT_OUTPUT_SRID: i32 = 4326;

/// Administrative boundary attached to every feature as a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminJoin {
    County,
    City,
}

impl AdminJoin {
    pub fn admin_level(self) -> i32 {
        match self {
            AdminJoin::County => 6,
            AdminJoin::City => 8,
        }
    }

    fn alias(self) -> &'static str {
        match self {
            AdminJoin::County => "county",
            AdminJoin::City => "city",
        }
    }

    /// Output property name, e.g. `county_name`.
    pub fn property(self) -> &'static str {
        match self {
            AdminJoin::County => "county_name",
            AdminJoin::City => "city_name",
        }
    }
}

/// A bound statement parameter, in `$n` order.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i32),
    Text(String),
    TextArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub binds: Vec<BindValue>,
    /// Shards the statement reads
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("At least one feature type is required")]
    NoTypes,
    #[error("Invalid identifier in feature store layout: {0}")]
    InvalidIdentifier(String),
}

/// What to fetch from the feature store.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureQuery {
    pub category: String,
    pub types: Vec<String>,
    /// Ignored for shards without a subtype column
    pub subtypes: Vec<String>,
    /// Geometry kinds to read; empty means all
    pub kinds: Vec<GeometryKind>,
    pub region: Option<BoundingRegion>,
    pub admin_joins: Vec<AdminJoin>,
    pub output_srid: i32,
    /// Return each geometry's centroid instead of the geometry itself
    pub centroid: bool,
}

impl FeatureQuery {
    pub fn new(category: impl Into<String>, types: Vec<String>) -> Self {
        Self {
            category: category.into(),
            types,
            subtypes: Vec::new(),
            kinds: Vec::new(),
            region: None,
            admin_joins: Vec::new(),
            output_srid: DEFAULT_OUTPUT_SRID,
            centroid: false,
        }
    }

    pub fn with_subtypes(mut self, subtypes: Vec<String>) -> Self {
        self.subtypes = subtypes;
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<GeometryKind>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_region(mut self, region: BoundingRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_admin_join(mut self, join: AdminJoin) -> Self {
        if !self.admin_joins.contains(&join) {
            self.admin_joins.push(join);
        }
        self
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.output_srid = srid;
        self
    }

    pub fn with_centroid(mut self, centroid: bool) -> Self {
        self.centroid = centroid;
        self
    }
}

/// Parameter list that hands out `$n` placeholders.
#[derive(Default)]
struct Binds(Vec<BindValue>);

impl Binds {
    fn push(&mut self, value: BindValue) -> String {
        self.0.push(value);
        format!("${}", self.0.len())
    }
}

/// Render the FeatureCollection statement for `query`.
///
/// Returns `Ok(None)` when the registry has no shard for the category, so
/// the caller can answer with an empty collection without a round trip.
pub fn build_query(
    registry: &SchemaRegistry,
    query: &FeatureQuery,
) -> Result<Option<BuiltQuery>, QueryError> {
    if query.types.is_empty() {
        return Err(QueryError::NoTypes);
    }
    let layout = registry.layout();
    if let Some(name) = layout.invalid_identifier() {
        return Err(QueryError::InvalidIdentifier(name.to_string()));
    }
    let tables = registry.tables_for(&query.category, &query.kinds);
    if tables.is_empty() {
        return Ok(None);
    }

    let mut binds = Binds::default();
    let srid = binds.push(BindValue::Int(query.output_srid));
    let types = binds.push(BindValue::TextArray(query.types.clone()));
    let wants_subtypes =
        !query.subtypes.is_empty() && tables.iter().any(|t| t.has_subtype_column);
    let subtypes = wants_subtypes.then(|| binds.push(BindValue::TextArray(query.subtypes.clone())));
    let regions: Vec<String> = query
        .region
        .iter()
        .flat_map(BoundingRegion::geojson_polygons)
        .map(|g| binds.push(BindValue::Text(g)))
        .collect();
    let admin_levels: Vec<(AdminJoin, String)> = query
        .admin_joins
        .iter()
        .map(|j| (*j, binds.push(BindValue::Int(j.admin_level()))))
        .collect();

    let selects: Vec<String> = tables
        .iter()
        .map(|table| {
            let ctx = SelectContext {
                table,
                srid: &srid,
                types: &types,
                subtypes: subtypes.as_deref(),
                regions: &regions,
                admin_levels: &admin_levels,
                centroid: query.centroid,
            };
            ctx.render(registry)
        })
        .collect();

    let sql = format!(
        "SELECT jsonb_build_object('type', 'FeatureCollection', 'features', \
         COALESCE(json_agg(ST_AsGeoJSON(features.*)::json), '[]'::json))::text AS collection \
         FROM ({}) AS features",
        selects.join(" UNION ALL ")
    );

    Ok(Some(BuiltQuery {
        sql,
        binds: binds.0,
        tables: tables.iter().map(|t| t.table.clone()).collect(),
    }))
}

struct SelectContext<'a> {
    table: &'a TableHandle,
    srid: &'a str,
    types: &'a str,
    subtypes: Option<&'a str>,
    regions: &'a [String],
    admin_levels: &'a [(AdminJoin, String)],
    centroid: bool,
}

impl SelectContext<'_> {
    fn render(&self, registry: &SchemaRegistry) -> String {
        let l = registry.layout();
        let q = |name: &str| quote_identifier(name);
        let col = |name: &str| format!("t.{}", q(name));

        let geometry = if self.centroid {
            format!("ST_Centroid(ST_Transform({}, {}))", col(&l.geom_column), self.srid)
        } else {
            format!("ST_Transform({}, {})", col(&l.geom_column), self.srid)
        };
        let subtype = if self.table.has_subtype_column {
            format!("{}::text", col(&l.subtype_column))
        } else {
            "NULL::text".to_string()
        };

        let mut sql = format!(
            "SELECT {} AS id, {}::text AS feature_type, {} AS feature_subtype, tg.{} AS tags",
            col(&l.id_column),
            col(&l.type_column),
            subtype,
            q(&l.tags_column)
        );
        for (join, _) in self.admin_levels {
            let _ = write!(
                sql,
                ", {}.{} AS {}",
                join.alias(),
                q(&l.admin_name_column),
                join.property()
            );
        }
        let _ = write!(sql, ", {} AS geom", geometry);

        let _ = write!(
            sql,
            " FROM {} t LEFT JOIN {}.{} tg ON tg.{} = {}",
            self.table.qualified_name(),
            q(&l.schema),
            q(&l.tags_table),
            q(&l.id_column),
            col(&l.id_column)
        );
        for (join, level) in self.admin_levels {
            let alias = join.alias();
            let _ = write!(
                sql,
                " LEFT JOIN {}.{} {alias} ON ST_Intersects({}, {alias}.{}) AND {alias}.{} = {}",
                q(&l.schema),
                q(&l.admin_table),
                col(&l.geom_column),
                q(&l.geom_column),
                q(&l.admin_level_column),
                level,
                alias = alias
            );
        }

        let _ = write!(sql, " WHERE {} = ANY({})", col(&l.type_column), self.types);
        if let (Some(subtypes), true) = (self.subtypes, self.table.has_subtype_column) {
            let _ = write!(sql, " AND {} = ANY({})", col(&l.subtype_column), subtypes);
        }
        if !self.regions.is_empty() {
            let filters: Vec<String> = self
                .regions
                .iter()
                .map(|p| {
                    format!(
                        "ST_Intersects(ST_Transform({}, {srid}), ST_SetSRID(ST_GeomFromGeoJSON({}), {srid}))",
                        col(&l.geom_column),
                        p,
                        srid = self.srid
                    )
                })
                .collect();
            let _ = write!(sql, " AND ({})", filters.join(" OR "));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use crate::query::registry::{CatalogEntry, FeatureStoreLayout};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_catalog(
            FeatureStoreLayout::default(),
            vec![
                CatalogEntry::new("power_point", true),
                CatalogEntry::new("power_line", false),
            ],
        )
        .0
    }

    fn types() -> Vec<String> {
        vec!["line".to_string(), "tower".to_string()]
    }

    #[test]
    fn test_unknown_category_has_no_statement() {
        let query = FeatureQuery::new("water", types());
        assert_eq!(build_query(&registry(), &query).unwrap(), None);
    }

    #[test]
    fn test_requires_types() {
        let query = FeatureQuery::new("power", vec![]);
        assert_eq!(build_query(&registry(), &query), Err(QueryError::NoTypes));
    }

    #[test]
    fn test_union_of_shards_with_bound_parameters() {
        let query = FeatureQuery::new("power", types());
        let built = build_query(&registry(), &query).unwrap().unwrap();
        assert_eq!(built.tables, vec!["power_point", "power_line"]);
        assert_eq!(built.sql.matches(" UNION ALL ").count(), 1);
        assert_eq!(
            built.binds,
            vec![BindValue::Int(4326), BindValue::TextArray(types())]
        );
        assert!(built.sql.contains("t.\"osm_type\" = ANY($2)"));
        assert!(built.sql.contains("COALESCE(json_agg("));
        assert!(!built.sql.contains("'tower'"));
    }

    #[test]
    fn test_subtypes_only_filter_tables_with_column() {
        let query = FeatureQuery::new("power", types()).with_subtypes(vec!["minor".to_string()]);
        let built = build_query(&registry(), &query).unwrap().unwrap();
        assert_eq!(built.binds.len(), 3);
        let selects: Vec<&str> = built.sql.split(" UNION ALL ").collect();
        assert!(selects[0].contains("t.\"osm_subtype\" = ANY($3)"));
        assert!(!selects[1].contains("osm_subtype\" = ANY"));
        assert!(selects[1].contains("NULL::text AS feature_subtype"));
    }

    #[test]
    fn test_region_and_admin_joins_are_bound() {
        let region = BoundingRegion::Box(BoundingBox::new(-1.0, -1.0, 1.0, 1.0).unwrap());
        let query = FeatureQuery::new("power", types())
            .with_kinds(vec![GeometryKind::Line])
            .with_region(region)
            .with_admin_join(AdminJoin::County)
            .with_admin_join(AdminJoin::City)
            .with_admin_join(AdminJoin::County);
        let built = build_query(&registry(), &query).unwrap().unwrap();
        assert_eq!(built.tables, vec!["power_line"]);
        assert_eq!(built.binds.len(), 5);
        assert!(matches!(&built.binds[2], BindValue::Text(g) if g.contains("Polygon")));
        assert_eq!(built.binds[3], BindValue::Int(6));
        assert_eq!(built.binds[4], BindValue::Int(8));
        assert!(built.sql.contains("ST_GeomFromGeoJSON($3)"));
        assert!(built.sql.contains("county.\"admin_level\" = $4"));
        assert!(built.sql.contains("AS county_name"));
        assert!(built.sql.contains("AS city_name"));
    }
}
