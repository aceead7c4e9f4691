use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::calibrate::BiasDarkFlatStep;
use crate::error::Result;
use crate::frame::{Image, ImageSet};
use crate::io::ImageContainer;

use super::types::{BatchReport, FileOutcome, PipelineStage, ProgressReporter};

/// Output file for `input`: `<dir>/<stem>_<suffix>.fits`, where `dir` is
/// `output_dir` or the input's own directory.
pub fn output_path(input: &Path, output_dir: Option<&Path>, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if suffix.is_empty() {
        format!("{stem}.fits")
    } else {
        format!("{stem}_{suffix}.fits")
    };
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(name)
}

/// Calibrate every file in `inputs` and write the results.
///
/// A file that fails is recorded in the report and the batch moves on. With
/// `parallel` set (and `reload` unset), files are calibrated one at a time
/// until all master frames are cached, then the rest run concurrently
/// against the read-only cache.
///
/// Only setup failures, such as an uncreatable output directory, are
/// returned as `Err`.
pub fn run_batch(
    step: &mut BiasDarkFlatStep,
    container: &dyn ImageContainer,
    inputs: &[PathBuf],
    reporter: Arc<dyn ProgressReporter>,
) -> Result<BatchReport> {
    let config = step.config().clone();
    config.validate()?;
    if let Some(ref dir) = config.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let parallel = config.parallel && !config.reload;
    if config.parallel && config.reload {
        warn!("Parallel calibration is disabled while reload is set");
    }
    info!(files = inputs.len(), parallel, "Starting calibration batch");

    let output_dir = config.output_dir.as_deref();
    let suffix = config.output_suffix.as_str();
    let mut outcomes = Vec::with_capacity(inputs.len());

    let mut next = 0;
    if parallel {
        // Warm-up: calibrate one at a time until every master frame is cached.
        reporter.begin_stage(PipelineStage::Resolving, None);
        while next < inputs.len() && !step.is_ready() {
            let input = &inputs[next];
            let result =
                calibrate_file(container, input, output_dir, suffix, |image| step.run(image));
            outcomes.push(record(input, result));
            next += 1;
            reporter.advance(next);
        }
        reporter.finish_stage();
    }

    let remaining = &inputs[next..];
    let done = AtomicUsize::new(0);
    reporter.begin_stage(PipelineStage::Calibrating, Some(remaining.len()));

    if parallel {
        let step: &BiasDarkFlatStep = step;
        let rest: Vec<FileOutcome> = remaining
            .par_iter()
            .map(|input| {
                let result = calibrate_file(container, input, output_dir, suffix, |image| {
                    step.check_configuration(&image.header);
                    step.apply(image)
                });
                reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
                record(input, result)
            })
            .collect();
        outcomes.extend(rest);
    } else {
        for input in remaining {
            let result =
                calibrate_file(container, input, output_dir, suffix, |image| step.run(image));
            outcomes.push(record(input, result));
            reporter.advance(done.fetch_add(1, Ordering::Relaxed) + 1);
        }
    }

    reporter.finish_stage();

    let report = BatchReport { outcomes };
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Calibration batch finished"
    );
    Ok(report)
}

fn calibrate_file<F>(
    container: &dyn ImageContainer,
    input: &Path,
    output_dir: Option<&Path>,
    suffix: &str,
    mut calibrate: F,
) -> Result<PathBuf>
where
    F: FnMut(&Image) -> Result<ImageSet>,
{
    let image = container.load(input)?;
    let calibrated = calibrate(&image)?;
    let output = output_path(input, output_dir, suffix);
    container.save(&calibrated, &output)?;
    info!(input = %input.display(), output = %output.display(), "Wrote calibrated image");
    Ok(output)
}

fn record(input: &Path, result: Result<PathBuf>) -> FileOutcome {
    if let Err(ref e) = result {
        error!(file = %input.display(), error = %e, "Calibration failed");
    }
    FileOutcome {
        input: input.to_path_buf(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let input = Path::new("/data/night1/m42_001.fit");
        assert_eq!(
            output_path(input, None, "BDF"),
            PathBuf::from("/data/night1/m42_001_BDF.fits")
        );
        assert_eq!(
            output_path(input, Some(Path::new("/out")), "cal"),
            PathBuf::from("/out/m42_001_cal.fits")
        );
        assert_eq!(
            output_path(input, Some(Path::new("/out")), ""),
            PathBuf::from("/out/m42_001.fits")
        );
    }
}
