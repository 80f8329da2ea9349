//! Pipeline-level errors.
//!
//! Fatal failures name the stage they came from. Recoverable ones (skipped
//! ensemble members, failed aggregation chunks) are reported as values on
//! the stage outcomes instead.

use crate::climate::StoreError;
use crate::db::repository::{ErrorContext, RepositoryError};
use crate::models::RegionError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No candidate model passed validation.
    #[error("No valid ensemble members: {message} {context}")]
    EmptyEnsemble {
        message: String,
        context: ErrorContext,
    },

    #[error("Invalid bounding region: {source}")]
    Region {
        #[from]
        source: RegionError,
    },

    #[error("Dataset store error: {source} {context}")]
    Store {
        #[source]
        source: StoreError,
        context: ErrorContext,
    },

    #[error("Aggregation failed: {message} {context}")]
    Aggregation {
        message: String,
        context: ErrorContext,
    },

    /// The load transaction rolled back.
    #[error("Load failed: {source}")]
    Load {
        #[source]
        source: RepositoryError,
    },

    /// Pool checkout timed out. Not retried in-process.
    #[error("Connection pool exhausted: {source}")]
    PoolExhausted {
        #[source]
        source: RepositoryError,
    },

    #[error("Run cancelled: {message} {context}")]
    Cancelled {
        message: String,
        context: ErrorContext,
    },

    #[error("Repository error: {source}")]
    Repository {
        #[source]
        source: RepositoryError,
    },

    #[error("Configuration error: {message} {context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

impl PipelineError {
    pub fn empty_ensemble(variable: &str, scenario: &str, candidates: usize) -> Self {
        Self::EmptyEnsemble {
            message: format!("{} candidate model(s) examined", candidates),
            context: ErrorContext::new("reduce_ensemble")
                .with_entity("ensemble")
                .with_entity_id(format!("{}/{}", variable, scenario)),
        }
    }

    pub fn store(operation: &str, source: StoreError) -> Self {
        Self::Store {
            source,
            context: ErrorContext::new(operation),
        }
    }

    pub fn aggregation(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Aggregation {
            message: message.into(),
            context,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
            context: ErrorContext::new("aggregate"),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Wrap a repository failure raised while loading.
    pub fn load(source: RepositoryError) -> Self {
        if source.is_pool_exhausted() {
            Self::PoolExhausted { source }
        } else {
            Self::Load { source }
        }
    }

    /// Pipeline stage the failure belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::EmptyEnsemble { .. } => "ensemble",
            Self::Region { .. } => "region",
            Self::Store { .. } => "ensemble",
            Self::Aggregation { .. } | Self::Cancelled { .. } => "aggregation",
            Self::Load { .. } | Self::PoolExhausted { .. } => "load",
            Self::Repository { .. } => "query",
            Self::Configuration { .. } => "configuration",
        }
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(source: RepositoryError) -> Self {
        if source.is_pool_exhausted() {
            Self::PoolExhausted { source }
        } else {
            Self::Repository { source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_is_classified() {
        let err: PipelineError =
            RepositoryError::pool_exhausted("timed out", ErrorContext::new("get_connection"))
                .into();
        assert!(matches!(err, PipelineError::PoolExhausted { .. }));
        assert_eq!(err.stage(), "load");

        let err = PipelineError::load(RepositoryError::query("constraint missing"));
        assert!(matches!(err, PipelineError::Load { .. }));
    }

    #[test]
    fn test_empty_ensemble_names_request() {
        let err = PipelineError::empty_ensemble("tasmax", "ssp245", 3);
        let text = err.to_string();
        assert!(text.contains("tasmax/ssp245"));
        assert!(text.contains("3 candidate"));
        assert_eq!(err.stage(), "ensemble");
    }
}
