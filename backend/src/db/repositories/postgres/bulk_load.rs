//! Staged COPY load of exposure rows.
//!
//! Everything runs in one transaction on one pooled connection:
//! session tuning with `SET LOCAL`, insert-or-ignore of the variables, a
//! temporary staging table filled by COPY in batches, and one
//! `INSERT ... SELECT` into the fact table that skips existing keys.

use diesel::pg::{CopyFormat, PgConnection};
use diesel::prelude::*;
use diesel::sql_query;
use log::debug;
use std::io::Write;

use super::models::NewVariableRow;
use super::schema::{climate_variables, exposure_staging};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};
use crate::load::{staging_csv, LoadBatch, LoadSummary, LoadTuning, StagingRow};

const CREATE_STAGING: &str = "CREATE TEMP TABLE exposure_staging (\
     feature_id BIGINT NOT NULL, \
     month INTEGER NOT NULL, \
     decade INTEGER NOT NULL, \
     variable_name TEXT NOT NULL, \
     scenario TEXT NOT NULL, \
     value DOUBLE PRECISION NOT NULL\
     ) ON COMMIT DROP";

const MERGE_STAGING: &str = "INSERT INTO exposure_records (feature_id, decade, month, variable_id, value) \
     SELECT s.feature_id, s.decade, s.month, v.variable_id, s.value \
     FROM exposure_staging s \
     JOIN climate_variables v ON v.variable_name = s.variable_name AND v.scenario = s.scenario \
     ON CONFLICT ON CONSTRAINT uq_exposure_record DO NOTHING";

pub(super) fn load_batch(
    conn: &mut PgConnection,
    batch: &LoadBatch,
) -> RepositoryResult<LoadSummary> {
    batch.tuning.validate().map_err(|e| {
        RepositoryError::validation_with_context(e, ErrorContext::new("load_exposures"))
    })?;

    conn.transaction::<_, RepositoryError, _>(|tx| {
        apply_tuning(tx, &batch.tuning)?;

        let rows: Vec<NewVariableRow> = batch.variables.iter().map(NewVariableRow::from).collect();
        let variables_created = diesel::insert_into(climate_variables::table)
            .values(&rows)
            .on_conflict((climate_variables::variable_name, climate_variables::scenario))
            .do_nothing()
            .execute(tx)
            .map_err(|e| RepositoryError::from(e).with_operation("insert_variables"))?;

        sql_query(CREATE_STAGING)
            .execute(tx)
            .map_err(|e| RepositoryError::from(e).with_operation("create_staging"))?;

        let mut staged_rows = 0;
        for (index, chunk) in batch.rows.chunks(batch.tuning.copy_batch_size).enumerate() {
            staged_rows += copy_chunk(tx, chunk)?;
            debug!("COPY batch {} staged {} row(s)", index, chunk.len());
        }

        let inserted_rows = sql_query(MERGE_STAGING)
            .execute(tx)
            .map_err(|e| RepositoryError::from(e).with_operation("merge_staging"))?;

        Ok(LoadSummary {
            variables_created,
            staged_rows,
            inserted_rows,
        })
    })
}

/// Session settings scoped to the current transaction.
fn apply_tuning(conn: &mut PgConnection, tuning: &LoadTuning) -> RepositoryResult<()> {
    // Values are validated or numeric, so they can be inlined.
    let mut statements = vec![
        format!("SET LOCAL maintenance_work_mem = '{}'", tuning.maintenance_work_mem),
        format!("SET LOCAL statement_timeout = {}", tuning.statement_timeout_ms),
    ];
    if let Some(workers) = tuning.max_parallel_workers {
        statements.push(format!("SET LOCAL max_parallel_maintenance_workers = {}", workers));
        statements.push(format!("SET LOCAL max_parallel_workers_per_gather = {}", workers));
    }
    for statement in statements {
        sql_query(statement)
            .execute(conn)
            .map_err(|e| RepositoryError::from(e).with_operation("apply_tuning"))?;
    }
    Ok(())
}

fn copy_chunk(conn: &mut PgConnection, rows: &[StagingRow]) -> RepositoryResult<usize> {
    let csv = staging_csv(rows).map_err(|e| {
        RepositoryError::internal_with_context(
            format!("Failed to serialize staging rows: {}", e),
            ErrorContext::new("copy_staging").with_details(format!("rows={}", rows.len())),
        )
    })?;
    diesel::copy_from(exposure_staging::table)
        .from_raw_data(exposure_staging::table, |copy: &mut dyn Write| {
            copy.write_all(&csv).map_err(RepositoryError::from)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
        .map_err(|e| e.with_operation("copy_staging"))
}
