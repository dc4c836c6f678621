//! Display capture through `scrap`

use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use scrap::{Capturer, Display};
use tracing::{debug, info};

use super::frame::{CaptureConfig, DisplayId, Region};
use super::source::{Acquire, Grab};
use crate::error::CaptureError;

/// How long to wait for the compositor to hand over a fresh frame.
const FRAME_WAIT: Duration = Duration::from_millis(500);

/// Grabs the configured display. The display handle is resolved on the
/// capture thread because `scrap::Capturer` is not `Send` on X11.
#[derive(Debug, Clone, Copy, Default)]
pub struct Screen;

impl Acquire for Screen {
    type Grabber = ScreenGrabber;

    fn open(&self, config: &CaptureConfig) -> Result<ScreenGrabber, CaptureError> {
        let display = resolve_display(config.display)?;
        let (width, height) = (display.width(), display.height());
        info!("Capturing display {} ({}x{})", config.display, width, height);

        let crop = match config.region {
            Some(region) => Crop::within(region, width, height)?,
            None => Crop {
                x: 0,
                y: 0,
                width,
                height,
            },
        };

        let capturer = Capturer::new(display).map_err(|e| {
            CaptureError::StartupFailure(format!(
                "cannot open display {}: {}",
                config.display, e
            ))
        })?;

        Ok(ScreenGrabber {
            capturer,
            source_height: height,
            crop,
        })
    }
}

fn resolve_display(id: DisplayId) -> Result<Display, CaptureError> {
    let unavailable =
        |e: std::io::Error| CaptureError::StartupFailure(format!("no display available: {}", e));
    match id {
        DisplayId::Primary => Display::primary().map_err(unavailable),
        DisplayId::Index(n) => Display::all()
            .map_err(unavailable)?
            .into_iter()
            .nth(n as usize)
            .ok_or_else(|| CaptureError::StartupFailure(format!("display {} does not exist", id))),
    }
}

#[derive(Debug, Clone, Copy)]
struct Crop {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Crop {
    fn within(region: Region, width: usize, height: usize) -> Result<Self, CaptureError> {
        let out_of_bounds = || {
            CaptureError::StartupFailure(format!(
                "region {} is outside the {}x{} display",
                region, width, height
            ))
        };
        let x = usize::try_from(region.x()).map_err(|_| out_of_bounds())?;
        let y = usize::try_from(region.y()).map_err(|_| out_of_bounds())?;
        let w = region.width() as usize;
        let h = region.height() as usize;
        if x + w > width || y + h > height {
            return Err(out_of_bounds());
        }
        Ok(Self {
            x,
            y,
            width: w,
            height: h,
        })
    }
}

pub struct ScreenGrabber {
    capturer: Capturer,
    source_height: usize,
    crop: Crop,
}

impl Grab for ScreenGrabber {
    fn grab(&mut self) -> Result<Option<RgbaImage>, CaptureError> {
        let deadline = Instant::now() + FRAME_WAIT;
        loop {
            match self.capturer.frame() {
                Ok(bgra) => {
                    let stride = bgra.len() / self.source_height;
                    return Ok(Some(crop_bgra(&bgra, stride, self.crop)));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(CaptureError::Acquisition("timed out waiting for a frame".into()));
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    debug!("Display grab failed: {}", e);
                    return Err(CaptureError::Acquisition(e.to_string()));
                }
            }
        }
    }
}

/// Copies the crop rectangle out of a BGRA buffer into an RGBA image.
fn crop_bgra(bgra: &[u8], stride: usize, crop: Crop) -> RgbaImage {
    let mut rgba = Vec::with_capacity(crop.width * crop.height * 4);
    for row in crop.y..crop.y + crop.height {
        let start = row * stride + crop.x * 4;
        for px in bgra[start..start + crop.width * 4].chunks_exact(4) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
    }
    // Dimensions match the buffer length by construction.
    RgbaImage::from_raw(crop.width as u32, crop.height as u32, rgba)
        .unwrap_or_else(|| RgbaImage::new(0, 0))
}
