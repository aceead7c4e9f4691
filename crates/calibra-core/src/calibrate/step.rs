use std::sync::Arc;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::consts::{BIAS_SUBTRACT_NAME, DARK_SUBTRACT_NAME, DATATYPE_IMAGE, KEY_DATATYPE};
use crate::error::{CalibraError, Result};
use crate::frame::{CalibrationFrame, CalibrationKind, Image, ImageSet};
use crate::header::Header;
use crate::io::ImageContainer;
use crate::resolve::FrameResolver;

use super::cache::FrameCache;
use super::config::CalibrationConfig;
use super::ops;

/// Bias subtraction, scaled dark subtraction and flat-field division.
///
/// Master frames are looked up through the resolver on first use and cached
/// for the following images until [`reset`](Self::reset), or looked up again
/// for every image when `reload` is set.
pub struct BiasDarkFlatStep {
    config: CalibrationConfig,
    resolver: Arc<dyn FrameResolver>,
    container: Arc<dyn ImageContainer>,
    cache: FrameCache,
}

impl BiasDarkFlatStep {
    pub fn new(
        config: CalibrationConfig,
        resolver: Arc<dyn FrameResolver>,
        container: Arc<dyn ImageContainer>,
    ) -> Self {
        Self {
            config,
            resolver,
            container,
            cache: FrameCache::new(),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Make sure a frame of `kind` is cached, loading it when the slot is
    /// empty or `reload` is set. A cached frame is kept even if the image's
    /// instrument keywords differ from the ones it was loaded for; the
    /// difference is only reported.
    pub fn ensure_frame_loaded(
        &mut self,
        kind: CalibrationKind,
        header: &Header,
    ) -> Result<&CalibrationFrame> {
        if self.config.reload || !self.cache.is_loaded(kind) {
            let frame = self.load_frame(kind, header)?;
            self.cache.insert(frame);
        } else if let Some(frame) = self.cache.get(kind) {
            debug!(%kind, file = %frame.source.display(), "Reusing cached calibration frame");
            warn_on_configuration_change(frame, header);
        }
        self.cache
            .get(kind)
            .ok_or(CalibraError::MissingCalibrationFrame { kind })
    }

    /// Load all three frames for `header` without calibrating anything.
    pub fn preload(&mut self, header: &Header) -> Result<()> {
        for kind in CalibrationKind::ALL {
            self.ensure_frame_loaded(kind, header)?;
        }
        Ok(())
    }

    /// Calibrate one image, loading master frames as needed.
    pub fn run(&mut self, image: &Image) -> Result<ImageSet> {
        self.preload(&image.header)?;
        self.apply(image)
    }

    /// Calibrate one image with the frames already cached. Never loads, so
    /// it can be shared across threads once the cache is filled.
    pub fn apply(&self, image: &Image) -> Result<ImageSet> {
        let bias = self.cached(CalibrationKind::Bias)?;
        let dark = self.cached(CalibrationKind::Dark)?;
        let flat = self.cached(CalibrationKind::Flat)?;

        let bias_subtracted = ops::subtract_bias(&image.data, &bias.data)?;
        let dark_subtracted = ops::subtract_dark(
            &bias_subtracted,
            &dark.data,
            self.config.scale_dark,
            image.exposure(),
            self.cache.dark_exposure(),
        )?;
        let corrected = ops::flat_correct(&dark_subtracted, &flat.data)?;

        let mut header = image.header.clone();
        header.set(KEY_DATATYPE, DATATYPE_IMAGE);
        for frame in [bias, dark, flat] {
            header.append_history(frame.history_entry());
        }

        let mut output = ImageSet::new(Image::new(corrected, header));
        if self.config.intermediate {
            output.add_image(BIAS_SUBTRACT_NAME, snapshot(bias_subtracted, &[bias]));
            output.add_image(DARK_SUBTRACT_NAME, snapshot(dark_subtracted, &[bias, dark]));
        }

        info!(
            rows = image.height(),
            cols = image.width(),
            intermediate = self.config.intermediate,
            "Calibrated image"
        );
        Ok(output)
    }

    /// True once all three master frames are cached.
    pub fn is_ready(&self) -> bool {
        CalibrationKind::ALL
            .iter()
            .all(|&kind| self.cache.is_loaded(kind))
    }

    /// Warn about instrument keywords in `header` that differ from those
    /// the cached frames were loaded for.
    pub fn check_configuration(&self, header: &Header) {
        for kind in CalibrationKind::ALL {
            if let Some(frame) = self.cache.get(kind) {
                warn_on_configuration_change(frame, header);
            }
        }
    }

    /// Drop all cached frames. The resolver keeps whatever it caches itself.
    pub fn reset(&mut self) {
        self.cache.clear();
        debug!("Calibration frame cache cleared");
    }

    fn cached(&self, kind: CalibrationKind) -> Result<&CalibrationFrame> {
        self.cache
            .get(kind)
            .ok_or(CalibraError::MissingCalibrationFrame { kind })
    }

    fn load_frame(&self, kind: CalibrationKind, header: &Header) -> Result<CalibrationFrame> {
        let path = self
            .resolver
            .resolve(kind, header)?
            .ok_or(CalibraError::MissingCalibrationFrame { kind })?;
        let loaded = self.container.load(&path)?;

        let exposure = match kind {
            CalibrationKind::Dark => loaded.exposure(),
            _ => None,
        };
        if kind == CalibrationKind::Dark && exposure.is_none() && self.config.scale_dark {
            warn!(file = %path.display(), "Dark frame has no numeric EXPTIME, scaling will fail");
        }

        let key_values = self
            .config
            .aux(kind)
            .fitkeys(kind)
            .into_iter()
            .map(|key| {
                let value = header.get(&key).cloned();
                (key, value)
            })
            .collect();

        info!(
            %kind,
            file = %path.display(),
            rows = loaded.height(),
            cols = loaded.width(),
            "Loaded calibration frame"
        );

        Ok(CalibrationFrame {
            kind,
            data: loaded.data,
            source: path,
            exposure,
            key_values,
        })
    }
}

/// Report every instrument keyword whose value changed since `frame` was
/// loaded.
fn warn_on_configuration_change(frame: &CalibrationFrame, header: &Header) {
    for (key, cached) in &frame.key_values {
        let same = match (cached, header.get(key)) {
            (Some(a), Some(b)) => a.matches(b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            warn!(
                kind = %frame.kind,
                key = key.as_str(),
                file = %frame.source.display(),
                "New data has a different value for an instrument keyword than the cached frame"
            );
        }
    }
}

/// Intermediate sub-image: fresh header recording the frames applied so far.
fn snapshot(data: Array2<f32>, applied: &[&CalibrationFrame]) -> Image {
    let mut header = Header::new();
    header.set(KEY_DATATYPE, DATATYPE_IMAGE);
    for frame in applied {
        header.append_history(frame.history_entry());
    }
    Image::new(data, header)
}
