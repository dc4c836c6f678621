pub mod frame;
#[cfg(feature = "screen")]
pub mod screen;
pub mod source;
pub mod synthetic;

pub use frame::{CaptureConfig, DisplayId, Frame, Region};
#[cfg(feature = "screen")]
pub use screen::Screen;
pub use source::{Acquire, CaptureSource, FrameSource, Grab, SourceState};
pub use synthetic::{Fill, Synthetic};
