use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use serde_json::Value;

use super::schema::climate_variables;
use crate::load::{NewVariable, VariableDefinition};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = climate_variables)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)] // created_at is only read for debugging
pub struct VariableRow {
    pub variable_id: i32,
    pub variable_name: String,
    pub scenario: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<VariableRow> for VariableDefinition {
    fn from(row: VariableRow) -> Self {
        Self {
            variable_id: row.variable_id,
            variable_name: row.variable_name,
            scenario: row.scenario,
            metadata: row.metadata,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = climate_variables)]
pub struct NewVariableRow {
    pub variable_name: String,
    pub scenario: String,
    pub metadata: Value,
}

impl From<&NewVariable> for NewVariableRow {
    fn from(variable: &NewVariable) -> Self {
        Self {
            variable_name: variable.variable_name.clone(),
            scenario: variable.scenario.clone(),
            metadata: variable.metadata.clone(),
        }
    }
}

/// One table of the feature store catalog.
#[derive(Debug, Clone, QueryableByName)]
pub struct CatalogRow {
    #[diesel(sql_type = Text)]
    pub table_name: String,
    #[diesel(sql_type = Bool)]
    pub has_subtype: bool,
}

/// Server-side assembled FeatureCollection.
#[derive(Debug, Clone, QueryableByName)]
pub struct CollectionRow {
    #[diesel(sql_type = Text)]
    pub collection: String,
}
