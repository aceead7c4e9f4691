//! Pixel arithmetic of the bias/dark/flat correction.
//!
//! Every operation checks dimensions first and returns a new array; inputs
//! are never modified, so a failed step leaves the caller's image intact.

use ndarray::{Array2, Zip};
use tracing::debug;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{CalibraError, Result};
use crate::frame::CalibrationKind;

/// Fail with `DimensionMismatch` unless `frame` has the shape of `image`.
pub fn check_dimensions(
    image: &Array2<f32>,
    frame: &Array2<f32>,
    kind: CalibrationKind,
) -> Result<()> {
    if image.dim() != frame.dim() {
        return Err(CalibraError::DimensionMismatch {
            kind,
            expected: image.dim(),
            found: frame.dim(),
        });
    }
    Ok(())
}

/// Elementwise `image - bias`.
pub fn subtract_bias(image: &Array2<f32>, bias: &Array2<f32>) -> Result<Array2<f32>> {
    check_dimensions(image, bias, CalibrationKind::Bias)?;
    Ok(combine(image, bias, |i, b| i - b))
}

/// Elementwise `image - dark`, or `image - dark * (img_exposure / dark_exposure)`
/// when `scale` is set. Dark current is assumed linear in exposure time.
pub fn subtract_dark(
    image: &Array2<f32>,
    dark: &Array2<f32>,
    scale: bool,
    img_exposure: Option<f64>,
    dark_exposure: Option<f64>,
) -> Result<Array2<f32>> {
    check_dimensions(image, dark, CalibrationKind::Dark)?;
    if !scale {
        return Ok(combine(image, dark, |i, d| i - d));
    }
    let factor = dark_scale(img_exposure, dark_exposure)?;
    debug!(factor, "Scaling dark frame");
    Ok(combine(image, dark, move |i, d| {
        (i as f64 - d as f64 * factor) as f32
    }))
}

/// Ratio `img_exposure / dark_exposure`, both of which must be finite and
/// strictly positive.
pub fn dark_scale(img_exposure: Option<f64>, dark_exposure: Option<f64>) -> Result<f64> {
    let img = valid_exposure(img_exposure, "image")?;
    let dark = valid_exposure(dark_exposure, "dark frame")?;
    Ok(img / dark)
}

fn valid_exposure(value: Option<f64>, frame: &str) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        Some(v) => Err(CalibraError::InvalidExposureTime {
            frame: frame.to_string(),
            value: v.to_string(),
        }),
        None => Err(CalibraError::InvalidExposureTime {
            frame: frame.to_string(),
            value: "missing or non-numeric".to_string(),
        }),
    }
}

/// Elementwise `image / flat`. The flat is used as-is, without
/// renormalization. Zero flat pixels produce non-finite output pixels; those
/// mark dead pixels and are not an error.
pub fn flat_correct(image: &Array2<f32>, flat: &Array2<f32>) -> Result<Array2<f32>> {
    check_dimensions(image, flat, CalibrationKind::Flat)?;
    let out = combine(image, flat, |i, f| i / f);
    let non_finite = count_non_finite(&out);
    if non_finite > 0 {
        debug!(non_finite, "Flat division produced non-finite pixels");
    }
    Ok(out)
}

/// Number of NaN or infinite pixels.
pub fn count_non_finite(data: &Array2<f32>) -> usize {
    data.iter().filter(|v| !v.is_finite()).count()
}

fn combine<F>(a: &Array2<f32>, b: &Array2<f32>, op: F) -> Array2<f32>
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    let zip = Zip::from(a).and(b);
    if a.len() >= PARALLEL_PIXEL_THRESHOLD {
        zip.par_map_collect(|&x, &y| op(x, y))
    } else {
        zip.map_collect(|&x, &y| op(x, y))
    }
}
