use std::fmt;
use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::KEY_EXPTIME;
use crate::error::{CalibraError, Result};
use crate::header::{Header, HeaderValue};

/// A single detector image: pixel values plus header.
#[derive(Clone, Debug)]
pub struct Image {
    /// Pixel data, row-major, shape = (rows, cols)
    pub data: Array2<f32>,
    pub header: Header,
}

impl Image {
    pub fn new(data: Array2<f32>, header: Header) -> Self {
        Self { data, header }
    }

    /// Image with an empty header.
    pub fn from_data(data: Array2<f32>) -> Self {
        Self::new(data, Header::new())
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Exposure time in seconds, if the header carries a numeric `EXPTIME`.
    pub fn exposure(&self) -> Option<f64> {
        self.header.get_f64(KEY_EXPTIME)
    }
}

/// A sub-image stored alongside the primary image, addressed by name.
#[derive(Clone, Debug)]
pub struct NamedImage {
    pub name: String,
    pub image: Image,
}

/// Primary image plus named sub-images, the in-memory form of a
/// multi-extension container.
#[derive(Clone, Debug)]
pub struct ImageSet {
    pub primary: Image,
    pub extensions: Vec<NamedImage>,
}

impl ImageSet {
    pub fn new(primary: Image) -> Self {
        Self {
            primary,
            extensions: Vec::new(),
        }
    }

    /// Add a named sub-image, replacing any existing one with the same name.
    pub fn add_image(&mut self, name: &str, image: Image) {
        if let Some(existing) = self.extensions.iter_mut().find(|e| e.name == name) {
            existing.image = image;
        } else {
            self.extensions.push(NamedImage {
                name: name.to_string(),
                image,
            });
        }
    }

    /// Primary image for `None`, otherwise the named sub-image.
    pub fn image(&self, target: Option<&str>) -> Option<&Image> {
        match target {
            None => Some(&self.primary),
            Some(name) => self
                .extensions
                .iter()
                .find(|e| e.name == name)
                .map(|e| &e.image),
        }
    }

    pub fn image_mut(&mut self, target: Option<&str>) -> Option<&mut Image> {
        match target {
            None => Some(&mut self.primary),
            Some(name) => self
                .extensions
                .iter_mut()
                .find(|e| e.name == name)
                .map(|e| &mut e.image),
        }
    }

    pub fn get_header_value(&self, key: &str, target: Option<&str>) -> Option<&HeaderValue> {
        self.image(target).and_then(|img| img.header.get(key))
    }

    pub fn set_header_value(
        &mut self,
        key: &str,
        value: impl Into<HeaderValue>,
        target: Option<&str>,
    ) -> Result<()> {
        let image = self
            .image_mut(target)
            .ok_or_else(|| CalibraError::UnknownImage(target.unwrap_or_default().to_string()))?;
        image.header.set(key, value);
        Ok(())
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name.as_str()).collect()
    }
}

/// The three calibration frame types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Bias,
    Dark,
    Flat,
}

impl CalibrationKind {
    /// Application order.
    pub const ALL: [CalibrationKind; 3] = [Self::Bias, Self::Dark, Self::Flat];

    /// Label used in HISTORY records.
    pub fn history_label(&self) -> &'static str {
        match self {
            Self::Bias => "BIAS",
            Self::Dark => "DARK",
            Self::Flat => "FLAT",
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bias => write!(f, "bias"),
            Self::Dark => write!(f, "dark"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// A loaded master calibration frame.
#[derive(Clone, Debug)]
pub struct CalibrationFrame {
    pub kind: CalibrationKind,
    pub data: Array2<f32>,
    /// File the frame was loaded from.
    pub source: PathBuf,
    /// `EXPTIME` of the frame itself. Only meaningful for darks.
    pub exposure: Option<f64>,
    /// Instrument keyword values of the image that triggered the load.
    pub key_values: Vec<(String, Option<HeaderValue>)>,
}

impl CalibrationFrame {
    /// HISTORY record naming the file this frame was resolved to, e.g.
    /// `BIAS: /calib/master_bias.fits`.
    pub fn history_entry(&self) -> String {
        format!("{}: {}", self.kind.history_label(), self.source.display())
    }
}
