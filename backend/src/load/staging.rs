//! Header-less CSV buffers for `COPY ... FROM STDIN (FORMAT csv)`.

use polars::prelude::*;

use super::StagingRow;

/// Column order of the staging table and of every CSV buffer.
pub const STAGING_COLUMNS: [&str; 6] = [
    "feature_id",
    "month",
    "decade",
    "variable_name",
    "scenario",
    "value",
];

pub fn staging_frame(rows: &[StagingRow]) -> PolarsResult<DataFrame> {
    df!(
        STAGING_COLUMNS[0] => rows.iter().map(|r| r.feature_id).collect::<Vec<i64>>(),
        STAGING_COLUMNS[1] => rows.iter().map(|r| r.month).collect::<Vec<i32>>(),
        STAGING_COLUMNS[2] => rows.iter().map(|r| r.decade).collect::<Vec<i32>>(),
        STAGING_COLUMNS[3] => rows.iter().map(|r| r.variable_name.as_str()).collect::<Vec<&str>>(),
        STAGING_COLUMNS[4] => rows.iter().map(|r| r.scenario.as_str()).collect::<Vec<&str>>(),
        STAGING_COLUMNS[5] => rows.iter().map(|r| r.value).collect::<Vec<f64>>(),
    )
}

/// Serialize rows as comma-delimited CSV without a header line.
pub fn staging_csv(rows: &[StagingRow]) -> PolarsResult<Vec<u8>> {
    let mut df = staging_frame(rows)?;
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(false)
        .with_separator(b',')
        .finish(&mut df)?;
    Ok(buf)
}
