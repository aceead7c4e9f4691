use std::ffi::{c_char, c_int, CString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::{sys, FitsFile};
use ndarray::Array2;
use tracing::debug;

use crate::consts::{FITS_KEYWORD_LEN, KEY_COMMENT, KEY_HISTORY};
use crate::error::{CalibraError, Result};
use crate::frame::{Image, ImageSet};
use crate::header::{is_commentary, Card, Header, HeaderValue};

/// Room for one header record plus the terminating NUL.
const RECORD_BUF_LEN: usize = 81;

/// Keywords describing the data layout. cfitsio consumes them on read and
/// regenerates them on write, so they never appear in an image header.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "EXTEND", "PCOUNT", "GCOUNT", "BSCALE", "BZERO",
    "EXTNAME",
];

/// cfitsio keeps global state unless built reentrant; one file at a time.
static FITS_IO: Mutex<()> = Mutex::new(());

fn lock_io() -> MutexGuard<'static, ()> {
    FITS_IO.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn is_structural(keyword: &str) -> bool {
    if STRUCTURAL_KEYWORDS.contains(&keyword) {
        return true;
    }
    keyword
        .strip_prefix("NAXIS")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Layout and header of one header-data unit.
#[derive(Clone, Debug)]
pub struct HduSummary {
    pub index: usize,
    /// `EXTNAME`, if present.
    pub name: Option<String>,
    /// `PRIMARY`, `IMAGE` or `TABLE`.
    pub kind: &'static str,
    /// Axis lengths, slowest axis first (`[rows, cols]` for a 2D image).
    pub axes: Vec<usize>,
    /// BITPIX of the stored pixels; `None` for tables.
    pub bitpix: Option<i64>,
    /// Non-structural cards.
    pub header: Header,
}

impl HduSummary {
    /// `(rows, cols)` of the 2D image carried by this HDU, `None` when the
    /// HDU carries no image data. A degenerate third axis of length 1 is
    /// accepted.
    pub fn image_shape(&self) -> Result<Option<(usize, usize)>> {
        if self.bitpix.is_none() || self.axes.is_empty() {
            return Ok(None);
        }
        match self.axes.as_slice() {
            [rows, cols] | [1, rows, cols] => {
                if *rows == 0 || *cols == 0 {
                    Ok(None)
                } else {
                    Ok(Some((*rows, *cols)))
                }
            }
            other => Err(CalibraError::InvalidFits(format!(
                "HDU {} has unsupported image axes {:?}",
                self.index, other
            ))),
        }
    }

    fn pixel_bytes(&self) -> usize {
        self.bitpix.map_or(0, |b| b.unsigned_abs() as usize / 8)
    }
}

/// An open FITS file with every HDU header already read. Holds the cfitsio
/// lock until dropped.
pub struct FitsReader {
    fptr: FitsFile,
    file_len: u64,
    pub hdus: Vec<HduSummary>,
    _io: MutexGuard<'static, ()>,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let io = lock_io();
        let file_len = fs::metadata(path)?.len();
        let mut fptr = FitsFile::open(path)?;

        let mut hdus = Vec::new();
        while let Ok(hdu) = fptr.hdu(hdus.len()) {
            let summary = summarize(&mut fptr, &hdu, hdus.len())?;
            hdus.push(summary);
        }
        if hdus.is_empty() {
            return Err(CalibraError::InvalidFits(format!(
                "{} has no readable HDU",
                path.display()
            )));
        }
        debug!(file = %path.display(), hdus = hdus.len(), "Opened FITS file");

        Ok(Self {
            fptr,
            file_len,
            hdus,
            _io: io,
        })
    }

    pub fn hdu_count(&self) -> usize {
        self.hdus.len()
    }

    /// Decode the image carried by HDU `index`.
    pub fn read_image(&mut self, index: usize) -> Result<Image> {
        let summary = self.hdus.get(index).ok_or_else(|| {
            CalibraError::InvalidFits(format!(
                "HDU index {} out of range (total: {})",
                index,
                self.hdus.len()
            ))
        })?;
        let (rows, cols) = summary.image_shape()?.ok_or_else(|| {
            CalibraError::InvalidFits(format!("HDU {index} carries no image data"))
        })?;
        check_data_size(index, rows, cols, summary.pixel_bytes(), self.file_len)?;
        let header = summary.header.clone();

        let hdu = self.fptr.hdu(index)?;
        let pixels: Vec<f32> = hdu.read_image(&mut self.fptr)?;
        let data = Array2::from_shape_vec((rows, cols), pixels)
            .map_err(|e| CalibraError::InvalidFits(e.to_string()))?;
        Ok(Image::new(data, header))
    }

    /// Index of the first HDU carrying 2D image data.
    fn first_image_index(&self) -> Result<usize> {
        for hdu in &self.hdus {
            if hdu.image_shape()?.is_some() {
                return Ok(hdu.index);
            }
        }
        Err(CalibraError::InvalidFits("no 2D image data found".into()))
    }

    /// The first image in the file. When the primary HDU is header-only its
    /// cards are merged under the image's own cards.
    pub fn primary_image(&mut self) -> Result<Image> {
        let index = self.first_image_index()?;
        let mut image = self.read_image(index)?;
        if index > 0 {
            image.header = inherit_primary(&self.hdus[0].header, image.header);
        }
        Ok(image)
    }

    /// The first image plus every later image HDU as a named sub-image.
    /// Unnamed extensions are called `HDU<index>`.
    pub fn read_set(&mut self) -> Result<ImageSet> {
        let first = self.first_image_index()?;
        let mut set = ImageSet::new(self.primary_image()?);
        for index in first + 1..self.hdus.len() {
            if self.hdus[index].image_shape()?.is_none() {
                continue;
            }
            let name = self.hdus[index]
                .name
                .clone()
                .unwrap_or_else(|| format!("HDU{index}"));
            let image = self.read_image(index)?;
            set.add_image(&name, image);
        }
        Ok(set)
    }
}

/// Read only the first header of a file. Pixel data is never touched.
pub fn read_primary_header(path: &Path) -> Result<Header> {
    let _io = lock_io();
    let mut fptr = FitsFile::open(path)?;
    let cards = read_cards(&mut fptr, 0)?;
    Ok(header_from_cards(cards))
}

/// Write an image set: primary image first, then one IMAGE extension per
/// named sub-image in order.
///
/// Every header is checked before anything touches the disk, and the file is
/// written next to `path` and renamed into place, so a failure never leaves
/// a truncated file where a good one was.
pub fn write_image_set(set: &ImageSet, path: &Path) -> Result<()> {
    check_writable(&set.primary.header)?;
    for ext in &set.extensions {
        check_writable(&ext.image.header)?;
    }

    let partial = partial_path(path);
    let _io = lock_io();
    if let Err(e) = write_hdus(set, &partial) {
        if let Err(cleanup) = fs::remove_file(&partial) {
            debug!(file = %partial.display(), error = %cleanup, "No partial file to remove");
        }
        return Err(e);
    }
    fs::rename(&partial, path)?;
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

fn write_hdus(set: &ImageSet, path: &Path) -> Result<()> {
    let (rows, cols) = set.primary.data.dim();
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[rows, cols],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let primary = fptr.primary_hdu()?;
    write_image(&mut fptr, &primary, &set.primary)?;

    for ext in &set.extensions {
        let (rows, cols) = ext.image.data.dim();
        let description = ImageDescription {
            data_type: ImageType::Float,
            dimensions: &[rows, cols],
        };
        let hdu = fptr.create_image(ext.name.clone(), &description)?;
        write_image(&mut fptr, &hdu, &ext.image)?;
    }
    Ok(())
}

fn write_image(fptr: &mut FitsFile, hdu: &FitsHdu, image: &Image) -> Result<()> {
    let pixels: Vec<f32> = image.data.iter().copied().collect();
    // Also makes `hdu` the current HDU for the raw card calls below.
    hdu.write_image(fptr, &pixels)?;

    for card in image.header.cards() {
        if is_structural(&card.keyword) {
            continue;
        }
        write_card(fptr, hdu, card)?;
    }
    Ok(())
}

fn write_card(fptr: &mut FitsFile, hdu: &FitsHdu, card: &Card) -> Result<()> {
    let keyword = card.keyword.as_str();
    if keyword.eq_ignore_ascii_case(KEY_HISTORY) || keyword.eq_ignore_ascii_case(KEY_COMMENT) {
        // cfitsio splits long text over as many cards as it needs.
        let text = c_string(&card.value.to_string())?;
        let mut status: c_int = 0;
        unsafe {
            if keyword.eq_ignore_ascii_case(KEY_HISTORY) {
                sys::ffphis(fptr.as_raw(), text.as_ptr(), &mut status);
            } else {
                sys::ffpcom(fptr.as_raw(), text.as_ptr(), &mut status);
            }
        }
        return check_status(status, keyword);
    }

    match &card.value {
        HeaderValue::String(s) => hdu.write_key(fptr, keyword, s.clone())?,
        HeaderValue::Integer(v) => hdu.write_key(fptr, keyword, *v)?,
        HeaderValue::Float(v) => hdu.write_key(fptr, keyword, *v)?,
        HeaderValue::Logical(b) => {
            let name = c_string(keyword)?;
            let no_comment = c_string("")?;
            let mut status: c_int = 0;
            unsafe {
                sys::ffpkyl(
                    fptr.as_raw(),
                    name.as_ptr(),
                    c_int::from(*b),
                    no_comment.as_ptr(),
                    &mut status,
                );
            }
            check_status(status, keyword)?;
        }
    }

    if let Some(ref comment) = card.comment {
        let name = c_string(keyword)?;
        let comment = c_string(comment)?;
        let mut status: c_int = 0;
        unsafe {
            sys::ffmcom(fptr.as_raw(), name.as_ptr(), comment.as_ptr(), &mut status);
        }
        check_status(status, keyword)?;
    }
    Ok(())
}

/// Reject cards cfitsio would refuse or silently alter.
fn check_writable(header: &Header) -> Result<()> {
    for card in header.cards() {
        let keyword = card.keyword.as_str();
        let valid_keyword = !keyword.is_empty()
            && keyword.len() <= FITS_KEYWORD_LEN
            && keyword
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
        if !valid_keyword {
            return Err(CalibraError::InvalidFits(format!(
                "keyword {keyword:?} does not fit a standard card"
            )));
        }
        match &card.value {
            HeaderValue::Float(v) if !v.is_finite() => {
                return Err(CalibraError::InvalidFits(format!(
                    "{keyword} has non-finite value {v}"
                )));
            }
            HeaderValue::String(s) if !is_printable(s) => {
                return Err(CalibraError::InvalidFits(format!(
                    "{keyword} value {s:?} is not printable ASCII"
                )));
            }
            _ => {}
        }
        if let Some(ref comment) = card.comment {
            if !is_printable(comment) {
                return Err(CalibraError::InvalidFits(format!(
                    "{keyword} comment {comment:?} is not printable ASCII"
                )));
            }
        }
    }
    Ok(())
}

fn is_printable(text: &str) -> bool {
    text.bytes().all(|b| (b' '..=b'~').contains(&b))
}

/// Pixel data must fit in the file before anything is allocated for it.
fn check_data_size(
    index: usize,
    rows: usize,
    cols: usize,
    pixel_bytes: usize,
    file_len: u64,
) -> Result<()> {
    let needed = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(pixel_bytes))
        .and_then(|n| u64::try_from(n).ok());
    match needed {
        Some(bytes) if bytes <= file_len => Ok(()),
        Some(bytes) => Err(CalibraError::InvalidFits(format!(
            "File truncated: HDU {index} needs {bytes} bytes of pixel data, file has {file_len}"
        ))),
        None => Err(CalibraError::InvalidFits(format!(
            "HDU {index}: image of {cols}x{rows} pixels is too large"
        ))),
    }
}

fn summarize(fptr: &mut FitsFile, hdu: &FitsHdu, index: usize) -> Result<HduSummary> {
    let (kind, axes, bitpix) = match &hdu.info {
        HduInfo::ImageInfo { shape, image_type } => {
            let kind = if index == 0 { "PRIMARY" } else { "IMAGE" };
            (kind, shape.clone(), Some(image_type_to_bitpix(image_type)))
        }
        HduInfo::TableInfo { .. } => ("TABLE", Vec::new(), None),
        HduInfo::AnyInfo => ("UNKNOWN", Vec::new(), None),
    };
    let cards = read_cards(fptr, index)?;
    let name = cards
        .iter()
        .find(|c| c.keyword == "EXTNAME")
        .and_then(|c| c.value.as_str())
        .map(|s| s.trim().to_string());
    Ok(HduSummary {
        index,
        name,
        kind,
        axes,
        bitpix,
        header: header_from_cards(cards),
    })
}

fn image_type_to_bitpix(image_type: &ImageType) -> i64 {
    match image_type {
        ImageType::UnsignedByte | ImageType::Byte => 8,
        ImageType::Short | ImageType::UnsignedShort => 16,
        ImageType::Long | ImageType::UnsignedLong => 32,
        ImageType::LongLong => 64,
        ImageType::Float => -32,
        ImageType::Double => -64,
    }
}

/// Every keyword record of HDU `index`, in file order. cfitsio splits each
/// record and classifies its value.
fn read_cards(fptr: &mut FitsFile, index: usize) -> Result<Vec<Card>> {
    // Also makes it the current HDU for the raw calls below.
    let hdu = fptr.hdu(index)?;
    let mut status: c_int = 0;
    let mut count: c_int = 0;
    let mut more: c_int = 0;
    unsafe {
        sys::ffghsp(fptr.as_raw(), &mut count, &mut more, &mut status);
    }
    check_status(status, "header size")?;

    let mut cards = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
    for n in 1..=count {
        let mut keyword = [0 as c_char; RECORD_BUF_LEN];
        let mut value = [0 as c_char; RECORD_BUF_LEN];
        let mut comment = [0 as c_char; RECORD_BUF_LEN];
        unsafe {
            sys::ffgkyn(
                fptr.as_raw(),
                n,
                keyword.as_mut_ptr(),
                value.as_mut_ptr(),
                comment.as_mut_ptr(),
                &mut status,
            );
        }
        check_status(status, "header record")?;

        let keyword = buf_text(&keyword).trim().to_ascii_uppercase();
        let value = buf_text(&value);
        let comment = buf_text(&comment);
        if keyword.is_empty() {
            continue;
        }
        if is_commentary(&keyword) {
            cards.push(Card {
                keyword,
                value: HeaderValue::String(comment.trim_end().to_string()),
                comment: None,
            });
            continue;
        }
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match typed_value(fptr, &hdu, &keyword, value) {
            Some(value) => {
                let comment = comment.trim();
                cards.push(Card {
                    keyword,
                    value,
                    comment: (!comment.is_empty()).then(|| comment.to_string()),
                });
            }
            None => debug!(keyword = %keyword, raw = value, "Skipping header value"),
        }
    }
    Ok(cards)
}

/// Convert a raw value field according to the type cfitsio reports for it.
fn typed_value(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    raw: &str,
) -> Option<HeaderValue> {
    let field = CString::new(raw).ok()?;
    let mut dtype: c_char = 0;
    let mut status: c_int = 0;
    unsafe {
        sys::ffdtyp(field.as_ptr(), &mut dtype, &mut status);
    }
    if status != 0 {
        return None;
    }

    match dtype as u8 {
        b'L' => Some(HeaderValue::Logical(raw == "T")),
        b'C' => read_key_optional::<String>(hdu, fptr, keyword)
            .map(|s| HeaderValue::String(s.trim_end().to_string())),
        b'I' => read_key_optional::<i64>(hdu, fptr, keyword)
            .map(HeaderValue::Integer)
            .or_else(|| read_key_optional::<f64>(hdu, fptr, keyword).map(HeaderValue::Float)),
        b'F' => read_key_optional::<f64>(hdu, fptr, keyword).map(HeaderValue::Float),
        _ => None,
    }
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}

fn header_from_cards(cards: Vec<Card>) -> Header {
    let mut header = Header::new();
    for card in cards {
        if !is_structural(&card.keyword) {
            header.push_card(card);
        }
    }
    header
}

fn inherit_primary(primary: &Header, own: Header) -> Header {
    let mut merged = primary.clone();
    for card in own.cards() {
        if is_commentary(&card.keyword) {
            merged.push_card(card.clone());
        } else {
            merged.set(&card.keyword, card.value.clone());
        }
    }
    merged
}

fn buf_text(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text)
        .map_err(|_| CalibraError::InvalidFits(format!("{text:?} contains a NUL byte")))
}

fn check_status(status: c_int, context: &str) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(CalibraError::InvalidFits(format!(
            "cfitsio error {status} at {context}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_keywords() {
        assert!(is_structural("NAXIS"));
        assert!(is_structural("NAXIS12"));
        assert!(!is_structural("NAXISX"));
        assert!(!is_structural("EXPTIME"));
    }

    #[test]
    fn test_data_size_overflow_is_an_error() {
        let huge = 1usize << 32;
        assert!(check_data_size(0, huge, huge, 4, u64::MAX).is_err());
        assert!(check_data_size(0, 10, 10, 4, 399).is_err());
        assert!(check_data_size(0, 10, 10, 4, 400).is_ok());
    }

    #[test]
    fn test_unwritable_cards() {
        let mut h = Header::new();
        h.set("EXPTIME", f64::NAN);
        assert!(check_writable(&h).is_err());

        let mut h = Header::new();
        h.set("OBSERVER", "Zoë");
        assert!(check_writable(&h).is_err());

        let mut h = Header::new();
        h.set("LONGKEYWORD", 1i64);
        assert!(check_writable(&h).is_err());

        let mut h = Header::new();
        h.set("DATE-OBS", "2020-09-19T03:12:45");
        h.set("X_BIN", 2i64);
        h.append_history("BIAS: /calib/master_bias.fits");
        assert!(check_writable(&h).is_ok());
    }

    #[test]
    fn test_partial_path_sits_next_to_target() {
        assert_eq!(
            partial_path(Path::new("/out/m42_BDF.fits")),
            PathBuf::from("/out/m42_BDF.fits.partial")
        );
    }
}
