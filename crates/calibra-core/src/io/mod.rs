pub mod fits;

use std::path::Path;

use crate::error::Result;
use crate::frame::{Image, ImageSet};

/// Storage backend for images and image sets.
///
/// The calibration step only ever goes through this trait, so tests and
/// alternative formats can stand in for the on-disk FITS files.
pub trait ImageContainer: Send + Sync {
    /// Load the first image in the container at `path`.
    fn load(&self, path: &Path) -> Result<Image>;

    /// Load the primary image plus all named sub-images.
    fn load_set(&self, path: &Path) -> Result<ImageSet>;

    fn save(&self, set: &ImageSet, path: &Path) -> Result<()>;
}

/// FITS files on the local filesystem, read and written through cfitsio.
///
/// File access is serialized across threads; pixel arithmetic is not.
#[derive(Clone, Copy, Debug, Default)]
pub struct FitsContainer;

impl ImageContainer for FitsContainer {
    fn load(&self, path: &Path) -> Result<Image> {
        fits::FitsReader::open(path)?.primary_image()
    }

    fn load_set(&self, path: &Path) -> Result<ImageSet> {
        fits::FitsReader::open(path)?.read_set()
    }

    fn save(&self, set: &ImageSet, path: &Path) -> Result<()> {
        fits::write_image_set(set, path)
    }
}
