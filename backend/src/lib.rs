//! # Climate Exposure Backend
//!
//! Turns downscaled climate model ensembles into per-feature exposure
//! values for infrastructure stored in a PostGIS feature store.
//!
//! ## Features
//!
//! - **Ensemble reduction**: per-model decade-month climatologies reduced
//!   to mean, median, stddev, min, max, q1 and q3
//! - **Feature queries**: one parameterized statement over sharded
//!   `{category}_{point|line|polygon}` tables, assembled into a GeoJSON
//!   FeatureCollection server-side
//! - **Zonal aggregation**: nearest-cell sampling for points, coverage
//!   weighting for lines and polygons on a rayon pool
//! - **Bulk load**: COPY into a staging table, then an idempotent merge
//!   into the exposure fact table
//!
//! ## Architecture
//!
//! - [`climate`]: dataset stores, grids and the ensemble reducer
//! - [`query`]: schema registry and feature query rendering
//! - [`zonal`]: aggregation kernels and the parallel engine
//! - [`load`]: staging rows and load settings
//! - [`db`]: repository traits with local and Postgres backends
//! - [`pipeline`]: the end-to-end run driven by [`config::PipelineConfig`]

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod climate;
pub mod config;
pub mod db;
pub mod error;
pub mod load;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod zonal;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{ExposurePipeline, RunOutcome, RunReport};
