//! Database access for the feature store and the exposure tables.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Pipeline (pipeline.rs) - read, aggregate, load         │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │ Arc<dyn FullRepository>
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository traits (repository/)                         │
//! │  - FeatureRepository: schema registry, feature queries   │
//! │  - ExposureRepository: idempotent bulk load              │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴──────────────┐
//!     │                              │
//! ┌───▼──────────────┐   ┌───────────▼───────────┐
//! │ LocalRepository  │   │ PostgresRepository    │
//! │ (in-memory)      │   │ (Diesel + r2d2)       │
//! └──────────────────┘   └───────────────────────┘
//! ```
//!
//! Repositories are created by [`RepositoryFactory`] or
//! [`RepositoryBuilder`] and passed explicitly to whoever needs them.

#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod checksum;
pub mod factory;
pub mod repo_config;
pub mod repositories;
pub mod repository;

// Postgres config is colocated with the repository implementation.
#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::PostgresConfig;
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}

pub use checksum::calculate_checksum;
pub use factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
pub use repo_config::{PostgresSettings, RepositoryConfig, RepositorySettings};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    ErrorContext, ExposureRepository, FeatureRepository, FullRepository, RepositoryError,
    RepositoryResult,
};
