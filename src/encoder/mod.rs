pub mod gif;
pub mod palette;
pub mod quantize;

pub use self::gif::{frame_delay, GifEncoder};
pub use self::palette::{Palette, QualityLevel};
pub use self::quantize::{quantize, IndexedImage};
