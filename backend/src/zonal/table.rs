//! Aggregation output rows and their post-processing.

use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::models::{DecadeMonth, Statistic, StatisticValues};

/// One feature's statistics for one decade-month bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalAggregationRecord {
    pub feature_id: i64,
    pub bucket: DecadeMonth,
    pub values: StatisticValues,
}

impl ZonalAggregationRecord {
    pub fn new(feature_id: i64, bucket: DecadeMonth, values: StatisticValues) -> Self {
        Self {
            feature_id,
            bucket,
            values,
        }
    }

    pub fn decade(&self) -> i32 {
        self.bucket.decade
    }

    pub fn month(&self) -> u32 {
        self.bucket.month
    }
}

/// Concatenated output of an aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationTable {
    records: Vec<ZonalAggregationRecord>,
}

impl AggregationTable {
    pub fn new(records: Vec<ZonalAggregationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ZonalAggregationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ZonalAggregationRecord> {
        self.records
    }

    /// Distinct feature ids, ascending.
    pub fn feature_ids(&self) -> BTreeSet<i64> {
        self.records.iter().map(|r| r.feature_id).collect()
    }

    /// Remove rows whose primary statistic is undefined.
    ///
    /// Returns the number of distinct feature ids with at least one
    /// removed row.
    pub fn drop_undefined(&mut self) -> usize {
        let mut dropped = BTreeSet::new();
        self.records.retain(|r| {
            let keep = r.values.is_defined();
            if !keep {
                dropped.insert(r.feature_id);
            }
            keep
        });
        dropped.len()
    }

    /// Round every value to `decimals` places.
    pub fn round(&mut self, decimals: u32) {
        let scale = 10f64.powi(decimals as i32);
        for record in &mut self.records {
            record.values = record.values.map(|v| (v * scale).round() / scale);
        }
    }

    /// Keep the first row for each `(feature_id, bucket)`.
    pub fn dedupe(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.records.len();
        self.records.retain(|r| seen.insert((r.feature_id, r.bucket)));
        before - self.records.len()
    }

    /// Order by feature id then bucket.
    pub fn sort(&mut self) {
        self.records
            .sort_by(|a, b| (a.feature_id, a.bucket).cmp(&(b.feature_id, b.bucket)));
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = ZonalAggregationRecord>) {
        self.records.extend(records);
    }

    /// Wide frame: `feature_id, decade, month` then one column per statistic.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut df = df!(
            "feature_id" => self.records.iter().map(|r| r.feature_id).collect::<Vec<_>>(),
            "decade" => self.records.iter().map(|r| r.decade()).collect::<Vec<_>>(),
            "month" => self.records.iter().map(|r| r.month()).collect::<Vec<_>>(),
        )?;
        for stat in Statistic::ALL {
            let values: Vec<f64> = self.records.iter().map(|r| r.values.get(stat)).collect();
            df.with_column(Series::new(stat.column_name().into(), values))?;
        }
        Ok(df)
    }
}
