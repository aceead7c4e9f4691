use thiserror::Error;

use crate::frame::CalibrationKind;

#[derive(Error, Debug)]
pub enum CalibraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FITS I/O error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("No matching {kind} frame found")]
    MissingCalibrationFrame { kind: CalibrationKind },

    #[error("{kind} frame is {found:?} but image is {expected:?} (rows, cols)")]
    DimensionMismatch {
        kind: CalibrationKind,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid exposure time for {frame}: {value}")]
    InvalidExposureTime { frame: String, value: String },

    #[error("No sub-image named {0}")]
    UnknownImage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CalibraError>;
