//! Registry of feature-store shard tables.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::GeometryKind;

/// Fixed names of the feature store's schema, columns and side tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStoreLayout {
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_geom_column")]
    pub geom_column: String,
    #[serde(default = "default_type_column")]
    pub type_column: String,
    #[serde(default = "default_subtype_column")]
    pub subtype_column: String,
    /// Side table holding every feature's tags, keyed by id
    #[serde(default = "default_tags_table")]
    pub tags_table: String,
    #[serde(default = "default_tags_column")]
    pub tags_column: String,
    /// Administrative boundary polygons
    #[serde(default = "default_admin_table")]
    pub admin_table: String,
    #[serde(default = "default_admin_name_column")]
    pub admin_name_column: String,
    #[serde(default = "default_admin_level_column")]
    pub admin_level_column: String,
}

fn default_schema() -> String {
    "osm".to_string()
}
fn default_id_column() -> String {
    "osm_id".to_string()
}
fn default_geom_column() -> String {
    "geom".to_string()
}
fn default_type_column() -> String {
    "osm_type".to_string()
}
fn default_subtype_column() -> String {
    "osm_subtype".to_string()
}
fn default_tags_table() -> String {
    "tags".to_string()
}
fn default_tags_column() -> String {
    "tags".to_string()
}
fn default_admin_table() -> String {
    "place_polygon".to_string()
}
fn default_admin_name_column() -> String {
    "name".to_string()
}
fn default_admin_level_column() -> String {
    "admin_level".to_string()
}

impl Default for FeatureStoreLayout {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            id_column: default_id_column(),
            geom_column: default_geom_column(),
            type_column: default_type_column(),
            subtype_column: default_subtype_column(),
            tags_table: default_tags_table(),
            tags_column: default_tags_column(),
            admin_table: default_admin_table(),
            admin_name_column: default_admin_name_column(),
            admin_level_column: default_admin_level_column(),
        }
    }
}

impl FeatureStoreLayout {
    /// First name in the layout that is not a plain identifier.
    pub fn invalid_identifier(&self) -> Option<&str> {
        [
            &self.schema,
            &self.id_column,
            &self.geom_column,
            &self.type_column,
            &self.subtype_column,
            &self.tags_table,
            &self.tags_column,
            &self.admin_table,
            &self.admin_name_column,
            &self.admin_level_column,
        ]
        .into_iter()
        .find(|name| !is_valid_identifier(name))
        .map(String::as_str)
    }
}

/// Identifiers are restricted to lowercase ASCII letters, digits and `_`.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Double-quote an identifier already checked by [`is_valid_identifier`].
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Split a shard name such as `power_line` into `("power", Line)`.
pub fn parse_table_name(table: &str) -> Option<(&str, GeometryKind)> {
    let (category, suffix) = table.rsplit_once('_')?;
    if category.is_empty() {
        return None;
    }
    let kind = GeometryKind::ALL
        .into_iter()
        .find(|k| k.table_suffix() == suffix)?;
    Some((category, kind))
}

/// A table as listed in the database catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub table: String,
    pub has_subtype: bool,
}

impl CatalogEntry {
    pub fn new(table: impl Into<String>, has_subtype: bool) -> Self {
        Self {
            table: table.into(),
            has_subtype,
        }
    }
}

/// One resolved shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub schema: String,
    pub table: String,
    pub category: String,
    pub kind: GeometryKind,
    pub has_subtype_column: bool,
}

impl TableHandle {
    /// `"schema"."table"`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }
}

/// Catalog entries that were not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDrift {
    /// Name does not follow `{category}_{kind}`
    UnrecognizedTable(String),
    /// Name contains characters outside `[a-z0-9_]`
    InvalidIdentifier(String),
}

impl fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDrift::UnrecognizedTable(t) => {
                write!(f, "table {} is not a {{category}}_{{point|line|polygon}} shard", t)
            }
            SchemaDrift::InvalidIdentifier(t) => {
                write!(f, "table name {:?} is not a plain identifier", t)
            }
        }
    }
}

/// Resolved mapping from `(category, kind)` to shard table.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    layout: FeatureStoreLayout,
    tables: BTreeMap<(String, GeometryKind), TableHandle>,
}

impl SchemaRegistry {
    /// Build from catalog entries of the layout's schema.
    ///
    /// Side tables named in the layout are skipped silently; anything else
    /// that does not parse as a shard is returned as drift and logged.
    pub fn from_catalog(
        layout: FeatureStoreLayout,
        entries: impl IntoIterator<Item = CatalogEntry>,
    ) -> (Self, Vec<SchemaDrift>) {
        let mut tables = BTreeMap::new();
        let mut drift = Vec::new();
        for entry in entries {
            if entry.table == layout.tags_table || entry.table == layout.admin_table {
                continue;
            }
            if !is_valid_identifier(&entry.table) {
                drift.push(SchemaDrift::InvalidIdentifier(entry.table));
                continue;
            }
            match parse_table_name(&entry.table) {
                Some((category, kind)) => {
                    debug!(
                        "Registered shard {}.{} (subtype column: {})",
                        layout.schema, entry.table, entry.has_subtype
                    );
                    tables.insert(
                        (category.to_string(), kind),
                        TableHandle {
                            schema: layout.schema.clone(),
                            table: entry.table.clone(),
                            category: category.to_string(),
                            kind,
                            has_subtype_column: entry.has_subtype,
                        },
                    );
                }
                None => drift.push(SchemaDrift::UnrecognizedTable(entry.table)),
            }
        }
        for d in &drift {
            warn!("Feature store schema drift: {}", d);
        }
        (Self { layout, tables }, drift)
    }

    pub fn layout(&self) -> &FeatureStoreLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, category: &str, kind: GeometryKind) -> Option<&TableHandle> {
        self.tables.get(&(category.to_string(), kind))
    }

    /// Shards of `category` restricted to `kinds` (all kinds when empty), in
    /// point, line, polygon order.
    pub fn tables_for(&self, category: &str, kinds: &[GeometryKind]) -> Vec<&TableHandle> {
        GeometryKind::ALL
            .into_iter()
            .filter(|k| kinds.is_empty() || kinds.contains(k))
            .filter_map(|k| self.get(category, k))
            .collect()
    }

    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.tables.keys().map(|(c, _)| c.as_str()).collect();
        categories.dedup();
        categories
    }
}
