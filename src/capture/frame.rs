use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::RegionError;

/// Axis-aligned capture rectangle. Width and height are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRegion")]
pub struct Region {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct RawRegion {
    x: i32,
    y: i32,
    width: i64,
    height: i64,
}

impl TryFrom<RawRegion> for Region {
    type Error = RegionError;

    fn try_from(raw: RawRegion) -> Result<Self, Self::Error> {
        Region::from_signed(raw.x, raw.y, raw.width, raw.height)
    }
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Result<Self, RegionError> {
        if width == 0 || height == 0 {
            return Err(RegionError::Invalid(format!(
                "width and height must be positive, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    fn from_signed(x: i32, y: i32, width: i64, height: i64) -> Result<Self, RegionError> {
        if width <= 0 || height <= 0 {
            return Err(RegionError::Invalid(format!(
                "width and height must be positive, got {}x{}",
                width, height
            )));
        }
        let width = u32::try_from(width)
            .map_err(|_| RegionError::Invalid(format!("width {} is too large", width)))?;
        let height = u32::try_from(height)
            .map_err(|_| RegionError::Invalid(format!("height {} is too large", height)))?;
        Self::new(x, y, width, height)
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Parses the `x,y,w,h` encoding. Fields past the fourth are ignored.
impl FromStr for Region {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(RegionError::Invalid(format!(
                "region must have 4 values (x,y,w,h), got {}",
                fields.len()
            )));
        }

        let parse = |name: &str, field: &str| {
            field
                .parse::<i64>()
                .map_err(|_| RegionError::Invalid(format!("{} is not an integer: {:?}", name, field)))
        };
        let x = parse("x", fields[0])?;
        let y = parse("y", fields[1])?;
        let w = parse("width", fields[2])?;
        let h = parse("height", fields[3])?;

        let x = i32::try_from(x).map_err(|_| RegionError::Invalid(format!("x {} out of range", x)))?;
        let y = i32::try_from(y).map_err(|_| RegionError::Invalid(format!("y {} out of range", y)))?;
        Region::from_signed(x, y, w, h)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// Physical display selector. `0` in user input means the primary display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum DisplayId {
    #[default]
    Primary,
    Index(u32),
}

impl From<u32> for DisplayId {
    fn from(id: u32) -> Self {
        match id {
            0 => DisplayId::Primary,
            n => DisplayId::Index(n),
        }
    }
}

impl From<DisplayId> for u32 {
    fn from(id: DisplayId) -> Self {
        match id {
            DisplayId::Primary => 0,
            DisplayId::Index(n) => n,
        }
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayId::Primary => f.write_str("primary"),
            DisplayId::Index(n) => write!(f, "#{}", n),
        }
    }
}

/// Per-session capture parameters, read-only once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture area. `None` captures the whole display.
    pub region: Option<Region>,
    pub fps: u32,
    pub display: DisplayId,
    /// Frames the source may queue before the producer blocks.
    pub buffer_frames: usize,
    /// Consecutive acquisition failures tolerated before the source gives up.
    pub max_consecutive_failures: u32,
}

impl CaptureConfig {
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_display(mut self, display: DisplayId) -> Self {
        self.display = display;
        self
    }

    /// Time between two frames, `1/fps`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            region: None,
            fps: 15,
            display: DisplayId::Primary,
            buffer_frames: 16,
            max_consecutive_failures: 5,
        }
    }
}

/// One captured RGBA raster. Owned by whoever currently holds it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,

    /// Capture instant
    pub timestamp: Instant,

    /// Position in the production order, starting at 0
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbaImage, sequence: u64) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// A frame with no pixels carries no image.
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_region() {
        let r: Region = "100,200,800,600".parse().unwrap();
        assert_eq!((r.x(), r.y(), r.width(), r.height()), (100, 200, 800, 600));
    }

    #[test]
    fn test_parse_ignores_trailing_fields() {
        let r: Region = "0,0,10,20,99,extra".parse().unwrap();
        assert_eq!(r, Region::new(0, 0, 10, 20).unwrap());
    }

    #[test]
    fn test_parse_allows_whitespace_and_negative_origin() {
        let r: Region = " -50, 10 , 640,480".parse().unwrap();
        assert_eq!((r.x(), r.y()), (-50, 10));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for input in ["", "1,2,3", "a,0,10,10", "0,0,ten,10", "0,0,0,10", "0,0,10,-5", "0,0,1.5,2"] {
            assert!(
                matches!(input.parse::<Region>(), Err(RegionError::Invalid(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_new_rejects_zero_dimensions() {
        assert!(Region::new(0, 0, 0, 1).is_err());
        assert!(Region::new(0, 0, 1, 0).is_err());
        assert!(Region::new(0, 0, 1, 1).is_ok());
    }

    #[test]
    fn test_region_json_is_validated() {
        let ok: Region = serde_json::from_str(r#"{"x":1,"y":2,"width":3,"height":4}"#).unwrap();
        assert_eq!(ok.to_string(), "1,2,3,4");
        assert!(serde_json::from_str::<Region>(r#"{"x":1,"y":2,"width":0,"height":4}"#).is_err());
    }

    #[test]
    fn test_display_id_sentinel() {
        assert_eq!(DisplayId::from(0), DisplayId::Primary);
        assert_eq!(DisplayId::from(2), DisplayId::Index(2));
        assert_eq!(u32::from(DisplayId::Primary), 0);
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(CaptureConfig::new(10).frame_interval(), Duration::from_millis(100));
        assert_eq!(CaptureConfig::new(0).frame_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_frame() {
        assert!(Frame::new(RgbaImage::new(0, 0), 0).is_empty());
        assert!(!Frame::new(RgbaImage::new(2, 2), 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_region_round_trip(x in any::<i32>(), y in any::<i32>(), w in 1u32..=u32::MAX, h in 1u32..=u32::MAX) {
            let r = Region::new(x, y, w, h).unwrap();
            prop_assert_eq!(r.to_string().parse::<Region>().unwrap(), r);
        }
    }
}
