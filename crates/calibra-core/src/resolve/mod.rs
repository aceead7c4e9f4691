//! Lookup of the master calibration file matching an image.

pub mod directory;

use std::path::PathBuf;

use crate::error::Result;
use crate::frame::CalibrationKind;
use crate::header::Header;

pub use directory::DirectoryResolver;

/// Finds the calibration file to use for an image.
///
/// `Ok(None)` means no candidate matched; the caller decides whether that
/// is fatal.
pub trait FrameResolver: Send + Sync {
    fn resolve(&self, kind: CalibrationKind, header: &Header) -> Result<Option<PathBuf>>;
}

/// Always answers with the same file per kind.
#[derive(Clone, Debug, Default)]
pub struct FixedResolver {
    bias: Option<PathBuf>,
    dark: Option<PathBuf>,
    flat: Option<PathBuf>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CalibrationKind, path: impl Into<PathBuf>) -> Self {
        let path = Some(path.into());
        match kind {
            CalibrationKind::Bias => self.bias = path,
            CalibrationKind::Dark => self.dark = path,
            CalibrationKind::Flat => self.flat = path,
        }
        self
    }
}

impl FrameResolver for FixedResolver {
    fn resolve(&self, kind: CalibrationKind, _header: &Header) -> Result<Option<PathBuf>> {
        Ok(match kind {
            CalibrationKind::Bias => self.bias.clone(),
            CalibrationKind::Dark => self.dark.clone(),
            CalibrationKind::Flat => self.flat.clone(),
        })
    }
}
