//! Idempotent bulk load of aggregation output into the exposure fact table.
//!
//! Each loaded statistic column becomes its own climate variable named
//! `{variable}_{column}` (e.g. `tasmax_ensemble_mean`). Rows are staged
//! through a temporary table and merged with `ON CONFLICT DO NOTHING`, so a
//! repeated load inserts nothing.

pub mod staging;

pub use staging::{staging_csv, staging_frame, STAGING_COLUMNS};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::Statistic;
use crate::zonal::AggregationTable;

/// Scenario label stored for historical runs.
pub const HISTORICAL_SCENARIO: &str = "historical";

/// Session settings applied with `SET LOCAL` for the load transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTuning {
    #[serde(default = "default_maintenance_work_mem")]
    pub maintenance_work_mem: String,
    /// Applied to both maintenance and per-gather parallel workers
    #[serde(default)]
    pub max_parallel_workers: Option<u32>,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Rows per COPY buffer
    #[serde(default = "default_copy_batch_size")]
    pub copy_batch_size: usize,
}

fn default_maintenance_work_mem() -> String {
    "1GB".to_string()
}

fn default_statement_timeout_ms() -> u64 {
    3_600_000
}

fn default_copy_batch_size() -> usize {
    5_000
}

impl Default for LoadTuning {
    fn default() -> Self {
        Self {
            maintenance_work_mem: default_maintenance_work_mem(),
            max_parallel_workers: None,
            statement_timeout_ms: default_statement_timeout_ms(),
            copy_batch_size: default_copy_batch_size(),
        }
    }
}

impl LoadTuning {
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_memory_setting(&self.maintenance_work_mem) {
            return Err(format!(
                "maintenance_work_mem must look like 512MB or 1GB, got {:?}",
                self.maintenance_work_mem
            ));
        }
        if self.copy_batch_size == 0 {
            return Err("copy_batch_size must be positive".to_string());
        }
        Ok(())
    }
}

/// `<digits>[kB|MB|GB|TB]`
pub fn is_valid_memory_setting(value: &str) -> bool {
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(digits_end);
    !digits.is_empty() && matches!(unit, "" | "kB" | "MB" | "GB" | "TB")
}

/// Store `historical` in a canonical spelling; other scenarios pass through.
pub fn normalize_scenario(scenario: &str) -> String {
    if scenario.eq_ignore_ascii_case(HISTORICAL_SCENARIO) {
        HISTORICAL_SCENARIO.to_string()
    } else {
        scenario.to_string()
    }
}

/// A variable row to insert-or-ignore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVariable {
    pub variable_name: String,
    pub scenario: String,
    pub metadata: Value,
}

/// A stored climate variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub variable_id: i32,
    pub variable_name: String,
    pub scenario: String,
    pub metadata: Value,
}

/// One row of the staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct StagingRow {
    pub feature_id: i64,
    pub month: i32,
    pub decade: i32,
    pub variable_name: String,
    pub scenario: String,
    pub value: f64,
}

/// A fact row, unique on `(feature_id, decade, month, variable_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub feature_id: i64,
    pub decade: i32,
    pub month: i32,
    pub variable_id: i32,
    pub value: f64,
}

/// Everything a repository needs to perform one load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBatch {
    pub variables: Vec<NewVariable>,
    pub rows: Vec<StagingRow>,
    pub tuning: LoadTuning,
}

/// Row counts from one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Variables newly inserted (existing ones are kept as-is)
    pub variables_created: usize,
    pub staged_rows: usize,
    pub inserted_rows: usize,
}

impl LoadSummary {
    /// Staged rows that already existed in the fact table.
    pub fn duplicate_rows(&self) -> usize {
        self.staged_rows.saturating_sub(self.inserted_rows)
    }
}

/// Caller-facing description of a load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub variable: String,
    pub scenario: String,
    /// Statistic columns to load, each as its own variable
    pub statistics: Vec<Statistic>,
    /// Free-form metadata copied onto every variable
    pub metadata: Value,
    pub tuning: LoadTuning,
}

impl LoadRequest {
    pub fn new(variable: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            scenario: scenario.into(),
            statistics: Statistic::ALL.to_vec(),
            metadata: Value::Object(Map::new()),
            tuning: LoadTuning::default(),
        }
    }

    pub fn with_statistics(mut self, statistics: Vec<Statistic>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_tuning(mut self, tuning: LoadTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Stored name of one statistic's variable.
    pub fn variable_name(&self, stat: Statistic) -> String {
        format!("{}_{}", self.variable, stat.column_name())
    }

    /// Expand the table into variables and staging rows.
    ///
    /// Non-finite values are not staged.
    pub fn prepare(&self, table: &AggregationTable) -> LoadBatch {
        let scenario = normalize_scenario(&self.scenario);
        let variables = self
            .statistics
            .iter()
            .map(|stat| {
                let mut metadata = match &self.metadata {
                    Value::Object(map) => map.clone(),
                    Value::Null => Map::new(),
                    other => {
                        let mut map = Map::new();
                        map.insert("metadata".to_string(), other.clone());
                        map
                    }
                };
                metadata.insert("base_variable".to_string(), json!(self.variable));
                metadata.insert("statistic".to_string(), json!(stat.column_name()));
                NewVariable {
                    variable_name: self.variable_name(*stat),
                    scenario: scenario.clone(),
                    metadata: Value::Object(metadata),
                }
            })
            .collect();

        let rows = table
            .records()
            .iter()
            .flat_map(|record| {
                self.statistics.iter().filter_map(|stat| {
                    let value = record.values.get(*stat);
                    value.is_finite().then(|| StagingRow {
                        feature_id: record.feature_id,
                        month: record.month() as i32,
                        decade: record.decade(),
                        variable_name: self.variable_name(*stat),
                        scenario: scenario.clone(),
                        value,
                    })
                })
            })
            .collect();

        LoadBatch {
            variables,
            rows,
            tuning: self.tuning.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecadeMonth, StatisticValues};
    use crate::zonal::ZonalAggregationRecord;

    #[test]
    fn test_memory_setting_validation() {
        for ok in ["1GB", "512MB", "64kB", "2TB", "1024"] {
            assert!(is_valid_memory_setting(ok), "{}", ok);
        }
        for bad in ["", "GB", "1 GB", "1gb", "1GB; DROP TABLE x", "-1GB"] {
            assert!(!is_valid_memory_setting(bad), "{}", bad);
        }
    }

    #[test]
    fn test_tuning_defaults_and_validation() {
        let tuning = LoadTuning::default();
        assert_eq!(tuning.statement_timeout_ms, 3_600_000);
        assert_eq!(tuning.copy_batch_size, 5_000);
        assert!(tuning.validate().is_ok());

        let bad = LoadTuning {
            copy_batch_size: 0,
            ..LoadTuning::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_prepare_expands_statistics() {
        let mut values = StatisticValues::splat(1.5);
        values.set(Statistic::StdDev, f64::NAN);
        let table = AggregationTable::new(vec![ZonalAggregationRecord::new(
            7,
            DecadeMonth::new(2050, 3).unwrap(),
            values,
        )]);
        let request = LoadRequest::new("tasmax", "Historical")
            .with_statistics(vec![Statistic::Mean, Statistic::StdDev])
            .with_metadata(json!({"source": "nex-gddp"}));
        let batch = request.prepare(&table);

        assert_eq!(batch.variables.len(), 2);
        assert_eq!(batch.variables[0].variable_name, "tasmax_ensemble_mean");
        assert_eq!(batch.variables[0].scenario, "historical");
        assert_eq!(batch.variables[1].metadata["statistic"], json!("ensemble_stddev"));
        assert_eq!(batch.variables[1].metadata["source"], json!("nex-gddp"));

        assert_eq!(batch.rows.len(), 1);
        let row = &batch.rows[0];
        assert_eq!((row.feature_id, row.decade, row.month), (7, 2050, 3));
        assert_eq!(row.value, 1.5);
    }

    #[test]
    fn test_summary_duplicates() {
        let summary = LoadSummary {
            variables_created: 0,
            staged_rows: 10,
            inserted_rows: 4,
        };
        assert_eq!(summary.duplicate_rows(), 6);
    }
}
