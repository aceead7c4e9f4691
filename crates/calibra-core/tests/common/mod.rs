use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use calibra_core::error::{CalibraError, Result};
use calibra_core::frame::{CalibrationKind, Image, ImageSet};
use calibra_core::header::{Header, HeaderValue};
use calibra_core::io::{FitsContainer, ImageContainer};
use calibra_core::resolve::FrameResolver;
use ndarray::Array2;

/// Header from (keyword, value) pairs.
pub fn header(cards: &[(&str, HeaderValue)]) -> Header {
    let mut h = Header::new();
    for (key, value) in cards {
        h.set(key, value.clone());
    }
    h
}

/// Constant image with the given header cards.
pub fn constant_image(rows: usize, cols: usize, value: f32, cards: &[(&str, HeaderValue)]) -> Image {
    Image::new(Array2::from_elem((rows, cols), value), header(cards))
}

/// Light frame with the usual instrument keywords.
pub fn light(rows: usize, cols: usize, value: f32, exptime: f64) -> Image {
    constant_image(
        rows,
        cols,
        value,
        &[
            ("EXPTIME", exptime.into()),
            ("INSTRUME", "ZWO ASI1600".into()),
            ("XBINNING", 1i64.into()),
            ("YBINNING", 1i64.into()),
            ("FILTER", "L".into()),
        ],
    )
}

/// Write `image` as a single-HDU FITS file.
pub fn write_fits(path: &Path, image: &Image) {
    FitsContainer
        .save(&ImageSet::new(image.clone()), path)
        .expect("write FITS");
}

/// One 80-byte header card with a pre-formatted value field.
pub fn raw_card(keyword: &str, value: &str) -> Vec<u8> {
    let text = if value.is_empty() {
        keyword.to_string()
    } else {
        format!("{:<8}= {:>20}", keyword, value)
    };
    let mut card = text.into_bytes();
    card.resize(80, b' ');
    card
}

/// Concatenate cards, add END and pad the header to a 2880-byte block.
pub fn raw_header(cards: &[Vec<u8>]) -> Vec<u8> {
    let mut buf: Vec<u8> = cards.iter().flatten().copied().collect();
    buf.extend(raw_card("END", ""));
    let padded = buf.len().div_ceil(2880) * 2880;
    buf.resize(padded, b' ');
    buf
}

/// Pad a data unit with zeros to a 2880-byte block.
pub fn pad_data(mut data: Vec<u8>) -> Vec<u8> {
    let padded = data.len().div_ceil(2880) * 2880;
    data.resize(padded, 0);
    data
}

/// Write raw bytes to a temporary file; keep the handle alive while in use.
pub fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    f.write_all(data).expect("write FITS data");
    f.flush().expect("flush");
    f
}

/// Resolver answering from a fixed table and counting lookups per kind.
#[derive(Default)]
pub struct CountingResolver {
    files: HashMap<CalibrationKind, PathBuf>,
    calls: Mutex<HashMap<CalibrationKind, usize>>,
}

impl CountingResolver {
    pub fn new(bias: &str, dark: &str, flat: &str) -> Self {
        let mut files = HashMap::new();
        files.insert(CalibrationKind::Bias, PathBuf::from(bias));
        files.insert(CalibrationKind::Dark, PathBuf::from(dark));
        files.insert(CalibrationKind::Flat, PathBuf::from(flat));
        Self {
            files,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn without(mut self, kind: CalibrationKind) -> Self {
        self.files.remove(&kind);
        self
    }

    pub fn calls(&self, kind: CalibrationKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl FrameResolver for CountingResolver {
    fn resolve(&self, kind: CalibrationKind, _header: &Header) -> Result<Option<PathBuf>> {
        *self.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        Ok(self.files.get(&kind).cloned())
    }
}

/// In-memory container keyed by path, counting loads and keeping saves.
#[derive(Default)]
pub struct MemoryContainer {
    images: Mutex<HashMap<PathBuf, Image>>,
    saved: Mutex<HashMap<PathBuf, ImageSet>>,
    loads: AtomicUsize,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, image: Image) {
        self.images.lock().unwrap().insert(PathBuf::from(path), image);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saved(&self, path: &Path) -> Option<ImageSet> {
        self.saved.lock().unwrap().get(path).cloned()
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

impl ImageContainer for MemoryContainer {
    fn load(&self, path: &Path) -> Result<Image> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                CalibraError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ))
            })
    }

    fn load_set(&self, path: &Path) -> Result<ImageSet> {
        self.load(path).map(ImageSet::new)
    }

    fn save(&self, set: &ImageSet, path: &Path) -> Result<()> {
        self.saved
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), set.clone());
        Ok(())
    }
}
