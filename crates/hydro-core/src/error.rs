//! Crate-wide error type. Library code returns `HydroResult<T>`; the CLI
//! layer wraps these in `anyhow::Context` the way `tools/*` binaries do.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HydroError {
    #[error("raster dimensions mismatch: {label} is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    DimensionMismatch {
        label: &'static str,
        got_w: usize,
        got_h: usize,
        want_w: usize,
        want_h: usize,
    },

    #[error("invalid flow-direction code {code} at row {row}, col {col}")]
    InvalidFlowDirection { code: u8, row: usize, col: usize },

    #[error("no drainage points supplied")]
    NoDrainagePoints,

    #[error("drainage point at row {row}, col {col} is outside raster bounds")]
    DrainagePointOutOfBounds { row: usize, col: usize },

    #[error("raster is empty (zero width or height)")]
    EmptyRaster,

    #[error("raster I/O error: {0}")]
    Io(String),
}

pub type HydroResult<T> = Result<T, HydroError>;
