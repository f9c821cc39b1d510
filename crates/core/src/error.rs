//! Error types for the FCPG workspace

use thiserror::Error;

/// Main error type for FCPG operations.
///
/// Precondition violations (misaligned grids, missing inputs) and failed
/// external commands are errors. Data-quality anomalies are not: those are
/// logged and counted by the component that finds them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input file not found: {0}")]
    MissingInput(std::path::PathBuf),

    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Geotransform mismatch: {expected:?} vs {actual:?}")]
    TransformMismatch {
        expected: [f64; 6],
        actual: [f64; 6],
    },

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("No data value not set")]
    NoDataNotSet,

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("External command `{command}` failed with status {status}")]
    ExternalProcess { command: String, status: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for FCPG operations
pub type Result<T> = std::result::Result<T, Error>;
