use crate::frame::{CalibrationFrame, CalibrationKind};

/// In-memory master frames, one slot per kind. A filled slot means the
/// frame is loaded.
#[derive(Clone, Debug, Default)]
pub struct FrameCache {
    bias: Option<CalibrationFrame>,
    dark: Option<CalibrationFrame>,
    flat: Option<CalibrationFrame>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: CalibrationKind) -> &Option<CalibrationFrame> {
        match kind {
            CalibrationKind::Bias => &self.bias,
            CalibrationKind::Dark => &self.dark,
            CalibrationKind::Flat => &self.flat,
        }
    }

    fn slot_mut(&mut self, kind: CalibrationKind) -> &mut Option<CalibrationFrame> {
        match kind {
            CalibrationKind::Bias => &mut self.bias,
            CalibrationKind::Dark => &mut self.dark,
            CalibrationKind::Flat => &mut self.flat,
        }
    }

    pub fn get(&self, kind: CalibrationKind) -> Option<&CalibrationFrame> {
        self.slot(kind).as_ref()
    }

    pub fn is_loaded(&self, kind: CalibrationKind) -> bool {
        self.slot(kind).is_some()
    }

    /// Store a frame in its kind's slot, returning the frame it replaces.
    pub fn insert(&mut self, frame: CalibrationFrame) -> Option<CalibrationFrame> {
        self.slot_mut(frame.kind).replace(frame)
    }

    /// Drop every cached frame.
    pub fn clear(&mut self) {
        self.bias = None;
        self.dark = None;
        self.flat = None;
    }

    /// Exposure captured from the dark frame when it was loaded.
    pub fn dark_exposure(&self) -> Option<f64> {
        self.dark.as_ref().and_then(|d| d.exposure)
    }
}
