pub mod calibrate;
pub mod consts;
pub mod error;
pub mod frame;
pub mod header;
pub mod io;
pub mod pipeline;
pub mod resolve;
