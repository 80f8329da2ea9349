//! Write access to the climate variable and exposure fact tables.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::load::{LoadBatch, LoadSummary, VariableDefinition};

/// Repository trait for loading aggregation output.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait ExposureRepository: Send + Sync {
    /// Load one batch in a single transaction.
    ///
    /// Variables are inserted if absent and fact rows already present are
    /// skipped, so loading the same batch twice inserts nothing the second
    /// time. On error nothing from the batch is visible.
    async fn load_exposures(&self, batch: &LoadBatch) -> RepositoryResult<LoadSummary>;

    /// Look up a variable by its unique `(name, scenario)` pair.
    async fn get_variable(
        &self,
        variable_name: &str,
        scenario: &str,
    ) -> RepositoryResult<Option<VariableDefinition>>;

    /// Number of fact rows stored for a variable.
    async fn count_exposures(&self, variable_id: i32) -> RepositoryResult<usize>;
}
