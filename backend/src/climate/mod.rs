//! Gridded climate data: discovery, validation and ensemble reduction.

pub mod dataset;
pub mod ensemble;
pub mod grid;
pub mod stats;
pub mod store;

pub use dataset::{Climatology, EnsembleStatistic};
pub use ensemble::{
    EnsembleOutcome, EnsembleReducer, EnsembleRequest, ReducerConfig, ValidationFailure,
};
pub use grid::{Grid, GridAxis, GridError};
pub use store::{
    DailySlab, DatasetStore, LocalDatasetStore, MemoryDatasetStore, StoreError, YearStore,
};
