use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use calibra_core::calibrate::{BiasDarkFlatStep, CalibrationConfig};
use calibra_core::frame::CalibrationKind;
use calibra_core::io::{FitsContainer, ImageContainer};
use calibra_core::pipeline::{run_batch, PipelineStage, ProgressReporter};
use calibra_core::resolve::DirectoryResolver;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Args)]
pub struct RunArgs {
    /// Input FITS files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Calibration config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Master bias file, skips the directory search
    #[arg(long)]
    pub bias: Option<PathBuf>,

    /// Master dark file, skips the directory search
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Master flat file, skips the directory search
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Directory searched for master frames of every kind
    #[arg(long)]
    pub calib_dir: Option<PathBuf>,

    /// Look up fresh master frames for every image
    #[arg(long)]
    pub reload: bool,

    /// Keep bias- and dark-subtracted images as extensions
    #[arg(long)]
    pub intermediate: bool,

    /// Subtract the dark without exposure scaling
    #[arg(long)]
    pub no_scale_dark: bool,

    /// Calibrate files in parallel once master frames are loaded
    #[arg(long)]
    pub parallel: bool,

    /// Output directory (default: next to each input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Suffix appended to output file names
    #[arg(long)]
    pub suffix: Option<String>,
}

/// Drives an indicatif bar from batch progress.
struct BarReporter {
    bar: ProgressBar,
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        self.bar.set_message(stage.to_string());
        if let Some(total) = total_items {
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(0);
    }

    fn advance(&self, items_done: usize) {
        self.bar.set_position(items_done as u64);
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    config.validate().context("Invalid calibration config")?;

    crate::summary::print_run_summary(&config, args.files.len());

    let bar = ProgressBar::new(args.files.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:20} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    let reporter = Arc::new(BarReporter { bar: bar.clone() });

    let resolver = Arc::new(DirectoryResolver::new(&config));
    let container: Arc<dyn ImageContainer> = Arc::new(FitsContainer);
    let mut step = BiasDarkFlatStep::new(config, resolver, container.clone());

    let report = run_batch(&mut step, container.as_ref(), &args.files, reporter)?;
    bar.finish_with_message("Done");

    crate::summary::print_batch_report(&report);

    if !report.is_success() {
        bail!(
            "{} of {} file(s) failed to calibrate",
            report.failed(),
            report.outcomes.len()
        );
    }
    Ok(())
}

/// Config file (or defaults) with command-line flags layered on top.
fn build_config(args: &RunArgs) -> Result<CalibrationConfig> {
    let mut config: CalibrationConfig = if let Some(ref config_path) = args.config {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {}", config_path.display()))?;
        toml::from_str(&contents).context("Invalid calibration config")?
    } else {
        CalibrationConfig::default()
    };

    config.reload |= args.reload;
    config.intermediate |= args.intermediate;
    config.parallel |= args.parallel;
    if args.no_scale_dark {
        config.scale_dark = false;
    }
    if let Some(ref dir) = args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if let Some(ref suffix) = args.suffix {
        config.output_suffix = suffix.clone();
    }

    for kind in CalibrationKind::ALL {
        let file = match kind {
            CalibrationKind::Bias => &args.bias,
            CalibrationKind::Dark => &args.dark,
            CalibrationKind::Flat => &args.flat,
        };
        let aux = config.aux_mut(kind);
        if let Some(ref dir) = args.calib_dir {
            aux.directory = Some(dir.clone());
        }
        if let Some(file) = file {
            aux.file = Some(file.clone());
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "calibra",
            "a.fits",
            "b.fits",
            "--dark",
            "master_dark.fits",
            "--calib-dir",
            "calib",
            "--no-scale-dark",
            "--suffix",
            "cal",
        ]);
        let config = build_config(&cli.run).unwrap();

        assert_eq!(cli.run.files.len(), 2);
        assert!(!config.scale_dark);
        assert_eq!(config.output_suffix, "cal");
        assert_eq!(config.dark.file, Some(PathBuf::from("master_dark.fits")));
        assert_eq!(config.bias.file, None);
        for kind in CalibrationKind::ALL {
            assert_eq!(config.aux(kind).directory, Some(PathBuf::from("calib")));
        }
    }
}
