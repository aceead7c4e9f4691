use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_OUTPUT_SUFFIX;
use crate::error::{CalibraError, Result};
use crate::frame::CalibrationKind;

/// Where and how to look up one kind of master calibration frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxFrameConfig {
    /// Use this file unconditionally, skipping the directory search.
    pub file: Option<PathBuf>,
    /// Directory searched for candidate files. Defaults to the current one.
    pub directory: Option<PathBuf>,
    /// Case-insensitive `*`/`?` wildcard for candidate file names.
    pub pattern: Option<String>,
    /// Header keywords whose values must equal the image's.
    pub fitkeys: Option<Vec<String>>,
    /// Maximum |DATE-OBS| distance in days. Non-positive disables the limit.
    pub date_range_days: f64,
}

impl AuxFrameConfig {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn pattern(&self, kind: CalibrationKind) -> String {
        self.pattern
            .clone()
            .unwrap_or_else(|| format!("*{kind}*.fit*"))
    }

    pub fn fitkeys(&self, kind: CalibrationKind) -> Vec<String> {
        self.fitkeys
            .clone()
            .unwrap_or_else(|| default_fitkeys(kind))
    }
}

/// Instrument keywords a master frame must share with the image.
pub fn default_fitkeys(kind: CalibrationKind) -> Vec<String> {
    let mut keys = vec![
        "INSTRUME".to_string(),
        "XBINNING".to_string(),
        "YBINNING".to_string(),
    ];
    if kind == CalibrationKind::Flat {
        keys.push("FILTER".to_string());
    }
    keys
}

/// Options of the bias/dark/flat step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Look up fresh calibration frames for every input image.
    pub reload: bool,
    /// Keep the bias- and dark-subtracted snapshots as sub-images.
    pub intermediate: bool,
    /// Scale the dark by the ratio of image and dark exposure times.
    pub scale_dark: bool,
    /// Calibrate batch inputs in parallel once the frames are cached.
    pub parallel: bool,
    /// Output directory. Defaults to each input's own directory.
    pub output_dir: Option<PathBuf>,
    /// Appended to the input file stem, e.g. `m42_001_BDF.fits`.
    pub output_suffix: String,
    pub bias: AuxFrameConfig,
    pub dark: AuxFrameConfig,
    pub flat: AuxFrameConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            reload: false,
            intermediate: false,
            scale_dark: true,
            parallel: false,
            output_dir: None,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            bias: AuxFrameConfig::default(),
            dark: AuxFrameConfig::default(),
            flat: AuxFrameConfig::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn aux(&self, kind: CalibrationKind) -> &AuxFrameConfig {
        match kind {
            CalibrationKind::Bias => &self.bias,
            CalibrationKind::Dark => &self.dark,
            CalibrationKind::Flat => &self.flat,
        }
    }

    pub fn aux_mut(&mut self, kind: CalibrationKind) -> &mut AuxFrameConfig {
        match kind {
            CalibrationKind::Bias => &mut self.bias,
            CalibrationKind::Dark => &mut self.dark,
            CalibrationKind::Flat => &mut self.flat,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_suffix.trim().is_empty() && self.output_dir.is_none() {
            return Err(CalibraError::Config(
                "an empty output suffix without an output directory would overwrite the inputs"
                    .into(),
            ));
        }
        for kind in CalibrationKind::ALL {
            let aux = self.aux(kind);
            if !aux.date_range_days.is_finite() {
                return Err(CalibraError::Config(format!(
                    "{kind}.date_range_days must be finite"
                )));
            }
            if aux.pattern.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(CalibraError::Config(format!("{kind}.pattern is empty")));
            }
        }
        Ok(())
    }
}
