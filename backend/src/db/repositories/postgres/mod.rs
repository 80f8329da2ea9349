//! Postgres repository implementation using Diesel.
//!
//! Reads the sharded feature store and owns the climate variable and
//! exposure fact tables created by the embedded migrations.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient query failures
//! - Pool checkout timeouts surface as `pool_exhausted` and are not retried
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use async_trait::async_trait;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::sql_types::{Array, Integer, Text};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::task;

use crate::db::repository::{
    ErrorContext, ExposureRepository, FeatureRepository, RepositoryError, RepositoryResult,
};
use crate::load::{LoadBatch, LoadSummary, VariableDefinition};
use crate::models::FeatureCollection;
use crate::query::{
    build_query, BindValue, CatalogEntry, FeatureQuery, FeatureStoreLayout, SchemaRegistry,
};

mod bulk_load;
mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl PostgresConfig {
    /// Create configuration from environment variables.
    ///
    /// `DATABASE_URL` (or `PG_DATABASE_URL`) is required; every other
    /// variable falls back to the [`Default`] value when unset or unparsable.
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;
        let defaults = Self::default();

        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Diesel-backed repository over the feature store and exposure tables.
///
/// Every call checks a connection out of the r2d2 pool on a blocking
/// thread. Retryable failures are retried with exponential backoff; a
/// checkout timeout is returned at once as `pool_exhausted`.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Build the pool and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        let mut conn = pool.get().map_err(|e| {
            RepositoryError::connection_with_context(
                e.to_string(),
                ErrorContext::new("get_connection_for_migrations"),
            )
        })?;
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        drop(conn);

        info!(
            "Postgres pool ready (max {} connection(s)), migrations applied",
            config.max_pool_size
        );
        Ok(Self { pool, config })
    }

    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let mut retry_delay = Duration::from_millis(self.config.retry_delay_ms);

        task::spawn_blocking(move || {
            let mut attempt = 0;
            loop {
                // A checkout timeout means the pool is saturated; fail hard.
                let mut conn = pool.get().map_err(|e| {
                    RepositoryError::pool_exhausted(
                        e.to_string(),
                        ErrorContext::new("get_connection")
                            .with_details(format!("attempt={}", attempt + 1)),
                    )
                })?;

                match f.clone()(&mut conn) {
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        attempt += 1;
                        warn!(
                            "Retrying after {} (attempt {} of {})",
                            e, attempt, max_retries
                        );
                        drop(conn);
                        std::thread::sleep(retry_delay);
                        retry_delay *= 2;
                    }
                    result => return result,
                }
            }
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

/// Attach the rendered parameters in `$n` order.
fn bind_all(sql: String, binds: Vec<BindValue>) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    binds
        .into_iter()
        .fold(sql_query(sql).into_boxed(), |query, value| match value {
            BindValue::Int(v) => query.bind::<Integer, _>(v),
            BindValue::Text(v) => query.bind::<Text, _>(v),
            BindValue::TextArray(v) => query.bind::<Array<Text>, _>(v),
        })
}

const CATALOG_QUERY: &str = "SELECT t.tablename::text AS table_name, \
     EXISTS (SELECT 1 FROM information_schema.columns c \
             WHERE c.table_schema = t.schemaname \
               AND c.table_name = t.tablename \
               AND c.column_name = $2) AS has_subtype \
     FROM pg_tables t \
     WHERE t.schemaname = $1 \
     ORDER BY t.tablename";

#[async_trait]
impl FeatureRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn load_schema_registry(
        &self,
        layout: &FeatureStoreLayout,
    ) -> RepositoryResult<SchemaRegistry> {
        let schema_name = layout.schema.clone();
        let subtype_column = layout.subtype_column.clone();
        let rows: Vec<CatalogRow> = self
            .with_conn(move |conn| {
                sql_query(CATALOG_QUERY)
                    .bind::<Text, _>(schema_name)
                    .bind::<Text, _>(subtype_column)
                    .load(conn)
                    .map_err(|e| map_diesel_error(e).with_operation("load_schema_registry"))
            })
            .await?;

        let (registry, drift) = SchemaRegistry::from_catalog(
            layout.clone(),
            rows.into_iter()
                .map(|r| CatalogEntry::new(r.table_name, r.has_subtype)),
        );
        info!(
            "Feature store schema {}: {} shard(s), {} drifted table(s)",
            layout.schema,
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
        let built = build_query(registry, query).map_err(|e| {
            RepositoryError::validation_with_context(
                e.to_string(),
                ErrorContext::new("fetch_feature_collection").with_entity(query.category.clone()),
            )
        })?;
        let Some(built) = built else {
            debug!("No shard for category {}; returning empty collection", query.category);
            return Ok(FeatureCollection::empty());
        };

        let tables = built.tables.join(",");
        let row: CollectionRow = self
            .with_conn(move |conn| {
                bind_all(built.sql.clone(), built.binds.clone())
                    .get_result(conn)
                    .map_err(|e| map_diesel_error(e).with_operation("fetch_feature_collection"))
            })
            .await?;

        serde_json::from_str(&row.collection).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Malformed FeatureCollection: {}", e),
                ErrorContext::new("fetch_feature_collection")
                    .with_details(format!("tables={}", tables)),
            )
        })
    }
}

#[async_trait]
impl ExposureRepository for PostgresRepository {
    async fn load_exposures(&self, batch: &LoadBatch) -> RepositoryResult<LoadSummary> {
        let batch = batch.clone();
        let summary = self
            .with_conn(move |conn| bulk_load::load_batch(conn, &batch))
            .await?;
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
        let variable_name = variable_name.to_string();
        let scenario = scenario.to_string();
        self.with_conn(move |conn| {
            climate_variables::table
                .filter(climate_variables::variable_name.eq(&variable_name))
                .filter(climate_variables::scenario.eq(&scenario))
                .select(VariableRow::as_select())
                .first::<VariableRow>(conn)
                .optional()
                .map(|row| row.map(VariableDefinition::from))
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn count_exposures(&self, variable_id: i32) -> RepositoryResult<usize> {
        self.with_conn(move |conn| {
            exposure_records::table
                .filter(exposure_records::variable_id.eq(variable_id))
                .count()
                .get_result::<i64>(conn)
                .map(|n| n as usize)
                .map_err(map_diesel_error)
        })
        .await
    }
}
