//! Repository traits for the feature store and the exposure tables.
//!
//! Each concern has its own trait so a backend can be tested piecewise;
//! [`FullRepository`] is what the pipeline depends on.

pub mod error;
pub mod exposure;
pub mod features;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use exposure::ExposureRepository;
pub use features::FeatureRepository;

/// Every repository capability the pipeline needs.
pub trait FullRepository: FeatureRepository + ExposureRepository {}

impl<T> FullRepository for T where T: FeatureRepository + ExposureRepository {}
