pub mod cache;
pub mod config;
pub mod ops;
mod step;

pub use cache::FrameCache;
pub use config::{AuxFrameConfig, CalibrationConfig};
pub use step::BiasDarkFlatStep;
