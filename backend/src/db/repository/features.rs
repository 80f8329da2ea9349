//! Read access to the vector feature store.

use async_trait::async_trait;
use log::warn;

use super::error::RepositoryResult;
use crate::models::{FeatureCollection, VectorFeature};
use crate::query::{FeatureQuery, FeatureStoreLayout, SchemaRegistry};

/// Repository trait for the sharded `{category}_{kind}` feature tables.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// Check that the backend answers.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Discover the shard tables of the layout's schema.
    ///
    /// Tables that do not follow the naming convention are logged and left
    /// out of the registry.
    async fn load_schema_registry(
        &self,
        layout: &FeatureStoreLayout,
    ) -> RepositoryResult<SchemaRegistry>;

    /// Fetch matching features as a single GeoJSON FeatureCollection.
    ///
    /// A category with no shard yields an empty collection, not an error.
    async fn fetch_feature_collection(
        &self,
        registry: &SchemaRegistry,
        query: &FeatureQuery,
    ) -> RepositoryResult<FeatureCollection>;

    /// Fetch and parse features, skipping members that are not valid.
    async fn fetch_features(
        &self,
        registry: &SchemaRegistry,
        query: &FeatureQuery,
    ) -> RepositoryResult<Vec<VectorFeature>> {
        let collection = self.fetch_feature_collection(registry, query).await?;
        let (features, rejected) = collection.to_features(&query.category);
        for (index, err) in &rejected {
            warn!("Skipping feature #{} of {}: {}", index, query.category, err);
        }
        Ok(features)
    }
}
