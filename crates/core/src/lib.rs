//! # FCPG Core
//!
//! Core types, traits and I/O for flow-conditioned parameter grids.
//!
//! This crate provides:
//! - `Raster<T>`: georeferenced grid carrying its own no-data value
//! - `GeoTransform`: affine transformation for georeferencing
//! - `CRS`: coordinate reference system identity
//! - `Basin`: sub-basin polygons with hydrologic unit identifiers
//! - Native GeoTIFF reading/writing that round-trips dtype, no-data, transform and CRS

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::CRS;
pub use error::{Error, Result};
pub use raster::{DataType, GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::CRS;
    pub use crate::error::{Error, Result};
    pub use crate::raster::{DataType, GeoTransform, Raster, RasterElement};
    pub use crate::vector::{Basin, BasinCollection};
    pub use crate::Algorithm;
}

/// Core trait for the grid algorithms of the FCPG pipeline.
///
/// Algorithms are pure functions that transform input rasters according to parameters.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
