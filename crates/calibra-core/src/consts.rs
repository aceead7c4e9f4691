/// Minimum pixel count (h*w) for elementwise frame arithmetic to run on Rayon.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Longest keyword that fits the fixed-format card layout.
pub const FITS_KEYWORD_LEN: usize = 8;

/// Exposure time keyword, in seconds.
pub const KEY_EXPTIME: &str = "EXPTIME";

/// Observation start timestamp, ISO-8601.
pub const KEY_DATE_OBS: &str = "DATE-OBS";

/// Data product type written by the step.
pub const KEY_DATATYPE: &str = "DATATYPE";

pub const KEY_HISTORY: &str = "HISTORY";

pub const KEY_COMMENT: &str = "COMMENT";

/// Value written to `DATATYPE` for calibrated images.
pub const DATATYPE_IMAGE: &str = "IMAGE";

/// Sub-image name for the snapshot taken after bias subtraction.
pub const BIAS_SUBTRACT_NAME: &str = "BIAS_SUBTRACT";

/// Sub-image name for the snapshot taken after dark subtraction.
pub const DARK_SUBTRACT_NAME: &str = "DARK_SUBTRACT";

/// Default suffix appended to calibrated output file stems.
pub const DEFAULT_OUTPUT_SUFFIX: &str = "BDF";
