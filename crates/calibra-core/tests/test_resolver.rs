#[allow(dead_code)]
mod common;

use std::path::Path;

use calibra_core::calibrate::{AuxFrameConfig, CalibrationConfig};
use calibra_core::frame::CalibrationKind;
use calibra_core::header::{Header, HeaderValue};
use calibra_core::resolve::{DirectoryResolver, FixedResolver, FrameResolver};
use tempfile::TempDir;

use common::{constant_image, header, write_fits};

fn master(dir: &Path, name: &str, cards: &[(&str, HeaderValue)]) {
    write_fits(&dir.join(name), &constant_image(4, 4, 1.0, cards));
}

fn camera(instrume: &str, binning: i64, date: &str) -> Vec<(&'static str, HeaderValue)> {
    vec![
        ("INSTRUME", instrume.into()),
        ("XBINNING", binning.into()),
        ("YBINNING", binning.into()),
        ("DATE-OBS", date.into()),
    ]
}

fn config_for(dir: &Path) -> CalibrationConfig {
    let mut config = CalibrationConfig::default();
    for kind in CalibrationKind::ALL {
        config.aux_mut(kind).directory = Some(dir.to_path_buf());
    }
    config
}

fn image_header(instrume: &str, binning: i64, date: &str) -> Header {
    header(&camera(instrume, binning, date))
}

fn file_name(path: Option<std::path::PathBuf>) -> Option<String> {
    path.and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
}

#[test]
fn test_fitkeys_must_match() {
    let dir = TempDir::new().unwrap();
    master(dir.path(), "bias_bin1.fits", &camera("ASI1600", 1, "2020-09-19T01:00:00"));
    master(dir.path(), "bias_bin2.fits", &camera("ASI1600", 2, "2020-09-19T01:00:00"));
    master(dir.path(), "bias_other.fits", &camera("QHY268", 1, "2020-09-19T01:00:00"));

    let resolver = DirectoryResolver::new(&config_for(dir.path()));

    let found = resolver
        .resolve(CalibrationKind::Bias, &image_header("ASI1600", 2, "2020-09-19T02:00:00"))
        .unwrap();
    assert_eq!(file_name(found).as_deref(), Some("bias_bin2.fits"));

    let none = resolver
        .resolve(CalibrationKind::Bias, &image_header("ASI294", 1, "2020-09-19T02:00:00"))
        .unwrap();
    assert!(none.is_none());
}

#[test]
fn test_flat_also_matches_filter() {
    let dir = TempDir::new().unwrap();
    let mut red = camera("ASI1600", 1, "2020-09-19T01:00:00");
    red.push(("FILTER", "R".into()));
    let mut green = camera("ASI1600", 1, "2020-09-19T01:00:00");
    green.push(("FILTER", "G".into()));
    master(dir.path(), "flat_R.fits", &red);
    master(dir.path(), "flat_G.fits", &green);

    let resolver = DirectoryResolver::new(&config_for(dir.path()));
    let mut h = image_header("ASI1600", 1, "2020-09-19T02:00:00");
    h.set("FILTER", "G");

    let found = resolver.resolve(CalibrationKind::Flat, &h).unwrap();
    assert_eq!(file_name(found).as_deref(), Some("flat_G.fits"));
}

#[test]
fn test_nearest_date_wins() {
    let dir = TempDir::new().unwrap();
    master(dir.path(), "dark_a.fits", &camera("ASI1600", 1, "2020-09-01T00:00:00"));
    master(dir.path(), "dark_b.fits", &camera("ASI1600", 1, "2020-09-18T22:00:00"));
    master(dir.path(), "dark_c.fits", &camera("ASI1600", 1, "2020-10-30T00:00:00"));
    master(dir.path(), "dark_undated.fits", &camera("ASI1600", 1, "unknown"));

    let resolver = DirectoryResolver::new(&config_for(dir.path()));
    let found = resolver
        .resolve(CalibrationKind::Dark, &image_header("ASI1600", 1, "2020-09-19T03:12:45"))
        .unwrap();
    assert_eq!(file_name(found).as_deref(), Some("dark_b.fits"));
}

#[test]
fn test_date_range_limit() {
    let dir = TempDir::new().unwrap();
    master(dir.path(), "dark_old.fits", &camera("ASI1600", 1, "2020-08-01T00:00:00"));

    let mut config = config_for(dir.path());
    config.dark.date_range_days = 10.0;
    let resolver = DirectoryResolver::new(&config);
    let h = image_header("ASI1600", 1, "2020-09-19T00:00:00");
    assert!(resolver.resolve(CalibrationKind::Dark, &h).unwrap().is_none());

    config.dark.date_range_days = 60.0;
    let resolver = DirectoryResolver::new(&config);
    assert!(resolver.resolve(CalibrationKind::Dark, &h).unwrap().is_some());
}

#[test]
fn test_pattern_selects_kind() {
    let dir = TempDir::new().unwrap();
    let cards = camera("ASI1600", 1, "2020-09-19T01:00:00");
    master(dir.path(), "Master_BIAS.fit", &cards);
    master(dir.path(), "master_dark.fits", &cards);
    master(dir.path(), "notes.txt", &cards);

    let resolver = DirectoryResolver::new(&config_for(dir.path()));
    let h = image_header("ASI1600", 1, "2020-09-19T02:00:00");

    let bias = resolver.resolve(CalibrationKind::Bias, &h).unwrap();
    assert_eq!(file_name(bias).as_deref(), Some("Master_BIAS.fit"));
    let dark = resolver.resolve(CalibrationKind::Dark, &h).unwrap();
    assert_eq!(file_name(dark).as_deref(), Some("master_dark.fits"));
    assert!(resolver.resolve(CalibrationKind::Flat, &h).unwrap().is_none());
}

#[test]
fn test_custom_fitkeys_and_pattern() {
    let dir = TempDir::new().unwrap();
    let mut cards = camera("ASI1600", 4, "2020-09-19T01:00:00");
    cards.push(("GAIN", 139i64.into()));
    master(dir.path(), "calib_offset.fits", &cards);

    let mut config = config_for(dir.path());
    config.bias = AuxFrameConfig {
        directory: Some(dir.path().to_path_buf()),
        pattern: Some("calib_*.fits".into()),
        fitkeys: Some(vec!["GAIN".into()]),
        ..Default::default()
    };
    let resolver = DirectoryResolver::new(&config);
    let mut h = image_header("ASI1600", 1, "2020-09-19T02:00:00");
    h.set("GAIN", 139i64);

    let found = resolver.resolve(CalibrationKind::Bias, &h).unwrap();
    assert_eq!(file_name(found).as_deref(), Some("calib_offset.fits"));
}

#[test]
fn test_explicit_file_wins() {
    let dir = TempDir::new().unwrap();
    master(dir.path(), "bias_match.fits", &camera("ASI1600", 1, "2020-09-19T01:00:00"));
    master(dir.path(), "chosen.fits", &camera("QHY268", 3, "2019-01-01T00:00:00"));

    let mut config = config_for(dir.path());
    config.bias.file = Some(dir.path().join("chosen.fits"));
    config.dark.file = Some(dir.path().join("missing.fits"));
    let resolver = DirectoryResolver::new(&config);
    let h = image_header("ASI1600", 1, "2020-09-19T02:00:00");

    let bias = resolver.resolve(CalibrationKind::Bias, &h).unwrap();
    assert_eq!(file_name(bias).as_deref(), Some("chosen.fits"));
    assert!(resolver.resolve(CalibrationKind::Dark, &h).unwrap().is_none());
}

#[test]
fn test_missing_directory_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let resolver = DirectoryResolver::new(&config_for(&dir.path().join("nope")));
    let h = image_header("ASI1600", 1, "2020-09-19T02:00:00");
    assert!(resolver.resolve(CalibrationKind::Bias, &h).unwrap().is_none());
}

#[test]
fn test_candidate_headers_are_cached() {
    let dir = TempDir::new().unwrap();
    let cards = camera("ASI1600", 1, "2020-09-19T01:00:00");
    master(dir.path(), "bias_1.fits", &cards);

    let resolver = DirectoryResolver::new(&config_for(dir.path()));
    let h = image_header("ASI1600", 1, "2020-09-19T02:00:00");
    assert!(resolver.resolve(CalibrationKind::Bias, &h).unwrap().is_some());

    // A file added after the first scan stays invisible until the cache is cleared.
    master(dir.path(), "bias_0.fits", &camera("ASI1600", 1, "2020-09-19T02:00:00"));
    let cached = resolver.resolve(CalibrationKind::Bias, &h).unwrap();
    assert_eq!(file_name(cached).as_deref(), Some("bias_1.fits"));

    resolver.clear_cache();
    let fresh = resolver.resolve(CalibrationKind::Bias, &h).unwrap();
    assert_eq!(file_name(fresh).as_deref(), Some("bias_0.fits"));
}

#[test]
fn test_fixed_resolver() {
    let resolver = FixedResolver::new().with(CalibrationKind::Flat, "/calib/flat.fits");
    let h = Header::new();
    assert_eq!(
        resolver.resolve(CalibrationKind::Flat, &h).unwrap(),
        Some("/calib/flat.fits".into())
    );
    assert!(resolver.resolve(CalibrationKind::Bias, &h).unwrap().is_none());
}
