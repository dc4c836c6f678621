//! Screen region recording into looping GIFs.
//!
//! A [`capture::FrameSource`] produces RGBA frames on its own thread, the
//! [`pipeline::Recorder`] drains them into a [`encoder::GifEncoder`], and the
//! encoder writes the finished animation in one atomic step.

pub mod capture;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod regions;
pub mod settings;

use std::path::PathBuf;

pub use error::{CaptureError, EncodeError, RecordError, RegionError, SettingsError};
pub use settings::Settings;

/// `$HOME/.config/witness`, where settings and saved regions live.
pub fn config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join("witness"))
}
