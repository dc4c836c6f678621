//! Animated GIF encoder with quality-driven palette quantization

use std::borrow::Cow;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use gif::{Encoder, Repeat};
use tracing::{debug, info, instrument};

use super::palette::QualityLevel;
use super::quantize::{quantize, IndexedImage};
use crate::capture::Frame;
use crate::error::EncodeError;

/// Empirical GIF/LZW compression ratio used for size projections.
const COMPRESSION_RATIO: u64 = 4;

/// Display delay per frame in hundredths of a second: `floor(100 / fps)`,
/// never below one tick.
pub fn frame_delay(fps: u32) -> u16 {
    (100 / fps.max(1)).max(1) as u16
}

struct BufferedFrame {
    image: IndexedImage,
    delay: u16,
}

/// Accumulates quantized frames and writes them as one looping GIF.
///
/// `encode` is terminal: once it succeeds the encoder rejects further calls
/// with [`EncodeError::AlreadyFinalized`].
pub struct GifEncoder {
    quality: QualityLevel,
    delay: u16,
    output: PathBuf,
    frames: Vec<BufferedFrame>,
    finalized: bool,
}

impl GifEncoder {
    pub fn new(output: impl Into<PathBuf>, fps: u32, quality: QualityLevel) -> Self {
        Self {
            quality,
            delay: frame_delay(fps),
            output: output.into(),
            frames: Vec::new(),
            finalized: false,
        }
    }

    pub fn quality(&self) -> QualityLevel {
        self.quality
    }

    /// Per-frame delay in hundredths of a second.
    pub fn delay(&self) -> u16 {
        self.delay
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Quantizes `frame` and appends it to the sequence. No I/O happens here.
    pub fn add_frame(&mut self, frame: Frame) -> Result<(), EncodeError> {
        if self.finalized {
            return Err(EncodeError::AlreadyFinalized);
        }
        if frame.is_empty() {
            return Err(EncodeError::InvalidFrame(format!(
                "frame {} has no image data ({}x{})",
                frame.sequence,
                frame.width(),
                frame.height()
            )));
        }
        if frame.width() > u32::from(u16::MAX) || frame.height() > u32::from(u16::MAX) {
            return Err(EncodeError::InvalidFrame(format!(
                "frame {} is {}x{}, GIF frames are limited to {}x{}",
                frame.sequence,
                frame.width(),
                frame.height(),
                u16::MAX,
                u16::MAX
            )));
        }

        let started = Instant::now();
        let image = quantize(&frame.image, self.quality.palette());
        metrics::histogram!("witness_quantize_time_us").record(started.elapsed().as_micros() as f64);
        debug!(sequence = frame.sequence, "quantized frame");

        self.frames.push(BufferedFrame {
            image,
            delay: self.delay,
        });
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Rough output size in bytes, for operator feedback only.
    pub fn estimate_size(&self) -> u64 {
        match self.frames.first() {
            Some(first) => {
                let area = u64::from(first.image.width()) * u64::from(first.image.height());
                area * self.frames.len() as u64 / COMPRESSION_RATIO
            }
            None => 0,
        }
    }

    /// Writes the buffered sequence to the output path and returns its size.
    ///
    /// The GIF is written to a temporary file next to the destination and
    /// renamed into place, so a failed encode never leaves a truncated file.
    /// Failures keep the buffered frames; only success finalizes.
    #[instrument(skip(self), fields(output = %self.output.display(), frames = self.frames.len()))]
    pub fn encode(&mut self) -> Result<u64, EncodeError> {
        if self.finalized {
            return Err(EncodeError::AlreadyFinalized);
        }
        if self.frames.is_empty() {
            return Err(EncodeError::NoFrames);
        }

        let started = Instant::now();
        let io_err = |source| EncodeError::Io {
            path: self.output.clone(),
            source,
        };

        let dir = match self.output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".witness-").suffix(".gif.part");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Same mode as a freshly created file, the umask still applies.
            builder.permissions(std::fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder.tempfile_in(dir).map_err(io_err)?;

        let writer = self.write_to(BufWriter::new(tmp.as_file_mut()))?;
        writer
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?
            .sync_all()
            .map_err(io_err)?;
        let bytes = tmp.as_file().metadata().map_err(io_err)?.len();

        tmp.persist(&self.output).map_err(|e| io_err(e.error))?;

        metrics::counter!("witness_frames_encoded_total").increment(self.frames.len() as u64);
        metrics::histogram!("witness_encode_time_ms").record(started.elapsed().as_millis() as f64);
        info!(bytes, "GIF written in {:?}", started.elapsed());

        self.frames.clear();
        self.finalized = true;
        Ok(bytes)
    }

    /// Serializes the buffered frames as a GIF stream into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<W, EncodeError> {
        let (width, height) = self.screen_size();
        let mut encoder = Encoder::new(writer, width, height, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;

        for buffered in &self.frames {
            let frame = gif::Frame {
                width: buffered.image.width() as u16,
                height: buffered.image.height() as u16,
                delay: buffered.delay,
                palette: Some(buffered.image.palette().to_vec()),
                buffer: Cow::Borrowed(buffered.image.pixels()),
                ..gif::Frame::default()
            };
            encoder.write_frame(&frame)?;
        }

        Ok(encoder.into_inner().map_err(gif::EncodingError::from)?)
    }

    /// Logical screen large enough for every frame.
    fn screen_size(&self) -> (u16, u16) {
        self.frames.iter().fold((0, 0), |(w, h), f| {
            (w.max(f.image.width() as u16), h.max(f.image.height() as u16))
        })
    }
}
