use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::calibrate::config::{AuxFrameConfig, CalibrationConfig};
use crate::consts::KEY_DATE_OBS;
use crate::error::Result;
use crate::frame::CalibrationKind;
use crate::header::Header;
use crate::io::fits::read_primary_header;

use super::FrameResolver;

const DATE_OBS_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Clone, Debug)]
struct Candidate {
    path: PathBuf,
    header: Header,
}

/// Searches a directory for the master frame whose instrument keywords
/// match the image and whose `DATE-OBS` is closest to it.
///
/// Candidate headers are read once per (directory, pattern) and kept until
/// [`DirectoryResolver::clear_cache`].
pub struct DirectoryResolver {
    bias: AuxFrameConfig,
    dark: AuxFrameConfig,
    flat: AuxFrameConfig,
    candidates: Mutex<HashMap<(PathBuf, String), Vec<Candidate>>>,
}

impl DirectoryResolver {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            bias: config.bias.clone(),
            dark: config.dark.clone(),
            flat: config.flat.clone(),
            candidates: Mutex::new(HashMap::new()),
        }
    }

    fn aux(&self, kind: CalibrationKind) -> &AuxFrameConfig {
        match kind {
            CalibrationKind::Bias => &self.bias,
            CalibrationKind::Dark => &self.dark,
            CalibrationKind::Flat => &self.flat,
        }
    }

    /// Forget all candidate headers read so far.
    pub fn clear_cache(&self) {
        self.candidates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn candidates(&self, dir: &Path, pattern: &str) -> Result<Vec<Candidate>> {
        let key = (dir.to_path_buf(), pattern.to_string());
        let mut cache = self.candidates.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(found) = cache.get(&key) {
            return Ok(found.clone());
        }
        let scanned = scan_directory(dir, pattern)?;
        debug!(dir = %dir.display(), pattern, count = scanned.len(), "Scanned calibration directory");
        cache.insert(key, scanned.clone());
        Ok(scanned)
    }
}

impl FrameResolver for DirectoryResolver {
    fn resolve(&self, kind: CalibrationKind, header: &Header) -> Result<Option<PathBuf>> {
        let aux = self.aux(kind);

        if let Some(ref file) = aux.file {
            if file.is_file() {
                return Ok(Some(file.clone()));
            }
            warn!(%kind, file = %file.display(), "Configured calibration file does not exist");
            return Ok(None);
        }

        let dir = aux.directory();
        let candidates = self.candidates(&dir, &aux.pattern(kind))?;
        let best = select_best(
            &candidates,
            header,
            &aux.fitkeys(kind),
            aux.date_range_days,
        );

        match best {
            Some(ref path) => info!(%kind, file = %path.display(), "Resolved calibration frame"),
            None => debug!(%kind, dir = %dir.display(), "No calibration frame matched"),
        }
        Ok(best)
    }
}

fn scan_directory(dir: &Path, pattern: &str) -> Result<Vec<Candidate>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Calibration directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .file_name()
            .map(|n| wildcard_match(pattern, &n.to_string_lossy()))
            .unwrap_or(false);
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut candidates = Vec::with_capacity(paths.len());
    for path in paths {
        match read_primary_header(&path) {
            Ok(header) => candidates.push(Candidate { path, header }),
            Err(e) => debug!(file = %path.display(), error = %e, "Skipping unreadable candidate"),
        }
    }
    Ok(candidates)
}

fn select_best(
    candidates: &[Candidate],
    header: &Header,
    fitkeys: &[String],
    date_range_days: f64,
) -> Option<PathBuf> {
    let image_date = date_obs(header);

    candidates
        .iter()
        .filter(|c| keys_match(header, &c.header, fitkeys))
        .filter_map(|c| {
            let distance = match (image_date, date_obs(&c.header)) {
                (Some(a), Some(b)) => {
                    Some((a - b).num_milliseconds().unsigned_abs() as f64 / MILLIS_PER_DAY)
                }
                _ => None,
            };
            if date_range_days > 0.0 && distance.is_some_and(|d| d > date_range_days) {
                return None;
            }
            Some((distance, c))
        })
        .min_by(|(da, a), (db, b)| {
            // Dated candidates first, nearest first, then by name.
            da.is_none()
                .cmp(&db.is_none())
                .then(da.unwrap_or(0.0).total_cmp(&db.unwrap_or(0.0)))
                .then_with(|| a.path.cmp(&b.path))
        })
        .map(|(_, c)| c.path.clone())
}

/// True when every keyword in `fitkeys` has the same value in both headers.
/// A keyword absent from both counts as matching.
pub(crate) fn keys_match(image: &Header, candidate: &Header, fitkeys: &[String]) -> bool {
    fitkeys
        .iter()
        .all(|key| match (image.get(key), candidate.get(key)) {
            (Some(a), Some(b)) => a.matches(b),
            (None, None) => true,
            _ => false,
        })
}

/// Parse the header's `DATE-OBS`.
pub fn date_obs(header: &Header) -> Option<NaiveDateTime> {
    let s = header.get_str(KEY_DATE_OBS)?.trim();
    DATE_OBS_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Case-insensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let n: Vec<char> = name.to_lowercase().chars().collect();

    let (mut pi, mut ni) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ni;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ni = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
