//! Vector feature queries against a sharded feature store.
//!
//! Feature tables are sharded as `{category}_{point|line|polygon}`. The
//! [`SchemaRegistry`] records which shards exist, and [`build_query`]
//! renders one parameterized statement that returns a GeoJSON
//! FeatureCollection assembled server-side.

pub mod builder;
pub mod registry;

pub use builder::{build_query, AdminJoin, BindValue, BuiltQuery, FeatureQuery, QueryError};
pub use registry::{
    is_valid_identifier, parse_table_name, quote_identifier, CatalogEntry, FeatureStoreLayout,
    SchemaDrift, SchemaRegistry, TableHandle,
};
