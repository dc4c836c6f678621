//! Synthetic acquisition for tests and the `demo` command

use std::time::Duration;

use image::{Rgba, RgbaImage};

use super::frame::CaptureConfig;
use super::source::{Acquire, Grab};
use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Solid([u8; 4]),
    /// Diagonal color ramp that shifts with every frame.
    Gradient,
}

/// Configurable fake device. Region dimensions, when configured, override
/// `width`/`height`.
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub width: u32,
    pub height: u32,
    pub fill: Fill,
    /// Stop after this many frames. `None` produces until stopped.
    pub frames: Option<u64>,
    /// Simulated acquisition latency per frame
    pub latency: Duration,
    /// Time `open` takes, like a device waiting on a permission prompt
    pub open_delay: Duration,
    pub startup_failure: Option<String>,
    /// Every n-th acquisition attempt fails with a per-frame fault.
    pub fault_every: Option<u64>,
}

impl Default for Synthetic {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fill: Fill::Solid([128, 128, 128, 255]),
            frames: None,
            latency: Duration::ZERO,
            open_delay: Duration::ZERO,
            startup_failure: None,
            fault_every: None,
        }
    }
}

impl Synthetic {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fill(mut self, fill: Fill) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_frames(mut self, frames: u64) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_startup_failure(mut self, message: impl Into<String>) -> Self {
        self.startup_failure = Some(message.into());
        self
    }

    pub fn with_fault_every(mut self, n: u64) -> Self {
        self.fault_every = Some(n.max(1));
        self
    }
}

impl Acquire for Synthetic {
    type Grabber = SyntheticGrabber;

    fn open(&self, config: &CaptureConfig) -> Result<SyntheticGrabber, CaptureError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if let Some(message) = &self.startup_failure {
            return Err(CaptureError::StartupFailure(message.clone()));
        }

        let (width, height) = config
            .region
            .map(|r| (r.width(), r.height()))
            .unwrap_or((self.width, self.height));

        Ok(SyntheticGrabber {
            device: self.clone(),
            width,
            height,
            attempts: 0,
            produced: 0,
        })
    }
}

pub struct SyntheticGrabber {
    device: Synthetic,
    width: u32,
    height: u32,
    attempts: u64,
    produced: u64,
}

impl Grab for SyntheticGrabber {
    fn grab(&mut self) -> Result<Option<RgbaImage>, CaptureError> {
        if self.device.frames.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }

        self.attempts += 1;
        if let Some(n) = self.device.fault_every {
            if self.attempts % n == 0 {
                return Err(CaptureError::Acquisition(format!(
                    "injected fault on attempt {}",
                    self.attempts
                )));
            }
        }

        if !self.device.latency.is_zero() {
            std::thread::sleep(self.device.latency);
        }

        let image = match self.device.fill {
            Fill::Solid(color) => RgbaImage::from_pixel(self.width, self.height, Rgba(color)),
            Fill::Gradient => gradient(self.width, self.height, self.produced as u32),
        };
        self.produced += 1;
        Ok(Some(image))
    }
}

/// Diagonal RGB ramp; `phase` scrolls it so consecutive frames differ.
pub fn gradient(width: u32, height: u32, phase: u32) -> RgbaImage {
    let w = width.max(1);
    let h = height.max(1);
    RgbaImage::from_fn(width, height, |x, y| {
        let r = ((u64::from(x) + u64::from(phase) * 4) % u64::from(w)) * 255 / u64::from(w);
        let g = y * 255 / h;
        let b = (x + y) * 255 / (w + h);
        Rgba([r as u8, g as u8, b as u8, 255])
    })
}
