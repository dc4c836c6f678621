//! Recording session: drains a frame source into the GIF encoder

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::capture::{Frame, FrameSource};
use crate::encoder::GifEncoder;
use crate::error::{CaptureError, EncodeError, RecordError};

/// Budgets that end a session on their own.
#[derive(Debug, Clone, Default)]
pub struct RecordingLimits {
    pub max_frames: Option<u64>,
    pub max_duration: Option<Duration>,
    /// Source errors tolerated before the session is aborted without output.
    pub error_budget: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future resolved (e.g. Ctrl-C).
    Requested,
    SourceExhausted,
    /// The source reported a terminal fault.
    SourceFailed,
    FrameLimit,
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub reason: StopReason,
    pub frames: u64,
    pub errors: u64,
    /// Frames drained after a frame limit was reached, or rejected by the encoder
    pub discarded: u64,
    pub elapsed: Duration,
    pub output: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Stats {
    frames: u64,
    errors: u64,
    discarded: u64,
}

/// Bridges one [`FrameSource`] to one [`GifEncoder`] for a single session.
///
/// The recorder is the only caller into the encoder. Everything that blocks
/// (opening and joining the source, quantizing each frame, the final write)
/// runs on the blocking pool so the runtime's workers stay free.
pub struct Recorder<S: FrameSource + 'static> {
    source: Arc<S>,
    /// Lent to the blocking pool while a frame is quantized.
    encoder: Option<GifEncoder>,
    output: PathBuf,
    limits: RecordingLimits,
    progress_every: u64,
    stats: Stats,
}

impl<S: FrameSource + 'static> Recorder<S> {
    pub fn new(source: S, encoder: GifEncoder, limits: RecordingLimits) -> Self {
        Self {
            source: Arc::new(source),
            output: encoder.output().to_path_buf(),
            encoder: Some(encoder),
            limits,
            progress_every: 0,
            stats: Stats::default(),
        }
    }

    /// Log progress every `frames` accepted frames.
    pub fn with_progress_every(mut self, frames: u64) -> Self {
        self.progress_every = frames;
        self
    }

    /// Starts the source, records until `shutdown` resolves or a limit is
    /// hit, then stops the source, drains in-flight frames and encodes once.
    #[instrument(skip_all, fields(output = %self.output.display()))]
    pub async fn run<F>(mut self, shutdown: F) -> Result<RecordingSummary, RecordError>
    where
        F: Future<Output = ()>,
    {
        let frames = self.source.frames();
        let errors = self.source.errors();

        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || source.start()).await??;
        let started = Instant::now();
        info!("Recording started");

        let max_duration = self.limits.max_duration;
        let deadline = async move {
            match max_duration {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(shutdown);
        tokio::pin!(deadline);

        let mut errors_open = true;
        let reason = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break StopReason::Requested,
                _ = &mut deadline => break StopReason::TimeLimit,
                err = errors.recv_async(), if errors_open => match err {
                    Ok(err) => {
                        if err.is_terminal() {
                            error!("Capture source failed: {}", err);
                            self.stats.errors += 1;
                            break StopReason::SourceFailed;
                        }
                        self.note_error(err).await?;
                    }
                    Err(_) => errors_open = false,
                },
                frame = frames.recv_async() => match frame {
                    Ok(frame) => {
                        if self.at_frame_limit() {
                            self.stats.discarded += 1;
                            break StopReason::FrameLimit;
                        }
                        self.accept(frame).await?;
                        if self.at_frame_limit() {
                            break StopReason::FrameLimit;
                        }
                    }
                    Err(_) => break StopReason::SourceExhausted,
                },
            }
        };
        info!(?reason, frames = self.stats.frames, "Recording ending");

        self.halt().await;
        let pending: Vec<Frame> = frames.drain().collect();
        for frame in pending {
            if self.at_frame_limit() {
                self.stats.discarded += 1;
            } else {
                self.accept(frame).await?;
            }
        }
        for err in errors.drain() {
            warn!("Capture error after stop: {}", err);
            self.stats.errors += 1;
        }

        let Recorder {
            encoder,
            output,
            stats,
            ..
        } = self;
        let mut encoder = encoder.ok_or(EncodeError::AlreadyFinalized)?;
        debug!(estimate = encoder.estimate_size(), "Encoding {} frames", encoder.frame_count());
        let bytes = tokio::task::spawn_blocking(move || encoder.encode()).await??;

        let summary = RecordingSummary {
            reason,
            frames: stats.frames,
            errors: stats.errors,
            discarded: stats.discarded,
            elapsed: started.elapsed(),
            output,
            bytes,
        };
        info!(
            frames = summary.frames,
            errors = summary.errors,
            bytes = summary.bytes,
            "Recording saved in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn at_frame_limit(&self) -> bool {
        self.limits
            .max_frames
            .is_some_and(|max| self.stats.frames >= max)
    }

    /// Quantizes `frame` into the encoder on the blocking pool.
    async fn accept(&mut self, frame: Frame) -> Result<(), RecordError> {
        let mut encoder = self.encoder.take().ok_or(EncodeError::AlreadyFinalized)?;
        let sequence = frame.sequence;
        let (encoder, added) = tokio::task::spawn_blocking(move || {
            let added = encoder.add_frame(frame);
            (encoder, added)
        })
        .await?;

        match added {
            Ok(()) => {
                self.stats.frames += 1;
                if self.progress_every > 0 && self.stats.frames % self.progress_every == 0 {
                    info!(
                        "Captured {} frames, ~{} KiB so far",
                        self.stats.frames,
                        encoder.estimate_size() / 1024
                    );
                }
            }
            Err(e) => {
                warn!(sequence, "Dropping frame: {}", e);
                self.stats.discarded += 1;
            }
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    /// Per-frame faults are warnings until the error budget runs out.
    async fn note_error(&mut self, err: CaptureError) -> Result<(), RecordError> {
        self.stats.errors += 1;
        warn!("Capture error: {}", err);
        if let Some(budget) = self.limits.error_budget {
            if self.stats.errors > budget {
                error!("Error budget of {} exhausted", budget);
                self.halt().await;
                return Err(RecordError::ErrorBudgetExceeded {
                    errors: self.stats.errors,
                });
            }
        }
        Ok(())
    }

    /// Stops the source; joining the capture thread happens off the runtime.
    async fn halt(&self) {
        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || source.stop()).await {
            Ok(Ok(())) | Ok(Err(CaptureError::NotRunning)) => {}
            Ok(Err(e)) => warn!("Failed to stop capture: {}", e),
            Err(e) => warn!("Stop task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureConfig, CaptureSource, Fill, SourceState, Synthetic};
    use crate::encoder::QualityLevel;
    use crate::error::EncodeError;
    use std::sync::Arc;

    fn recorder(
        synthetic: Synthetic,
        config: CaptureConfig,
        limits: RecordingLimits,
        output: PathBuf,
    ) -> Recorder<CaptureSource<Synthetic>> {
        let encoder = GifEncoder::new(output, config.fps, QualityLevel::Low);
        Recorder::new(CaptureSource::new(synthetic, config), encoder, limits)
    }

    fn small() -> Synthetic {
        Synthetic::default().with_size(16, 12).with_fill(Fill::Gradient)
    }

    #[tokio::test]
    async fn test_records_until_source_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("five.gif");
        let rec = recorder(
            small().with_frames(5),
            CaptureConfig::new(100),
            RecordingLimits::default(),
            output.clone(),
        );

        let summary = rec.run(std::future::pending()).await.unwrap();
        assert_eq!(summary.reason, StopReason::SourceExhausted);
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.errors, 0);
        assert!(summary.bytes > 0);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), summary.bytes);
    }

    #[tokio::test]
    async fn test_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_frames: Some(3),
            ..Default::default()
        };
        let rec = recorder(small(), CaptureConfig::new(100), limits, dir.path().join("three.gif"));

        let summary = rec.run(std::future::pending()).await.unwrap();
        assert_eq!(summary.reason, StopReason::FrameLimit);
        assert_eq!(summary.frames, 3);
    }

    #[tokio::test]
    async fn test_shutdown_request_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("stopped.gif");
        let rec = recorder(small(), CaptureConfig::new(50), RecordingLimits::default(), output.clone());

        let summary = rec
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Requested);
        assert!(summary.frames >= 1);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_time_limit() {
        let dir = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_duration: Some(Duration::from_millis(150)),
            ..Default::default()
        };
        let rec = recorder(small(), CaptureConfig::new(50), limits, dir.path().join("timed.gif"));

        let summary = rec.run(std::future::pending()).await.unwrap();
        assert_eq!(summary.reason, StopReason::TimeLimit);
        assert!(summary.frames >= 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(
            small().with_frames(4).with_fault_every(2),
            CaptureConfig::new(200),
            RecordingLimits::default(),
            dir.path().join("faulty.gif"),
        );

        let summary = rec.run(std::future::pending()).await.unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.errors, 3);
    }

    #[tokio::test]
    async fn test_error_budget_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("aborted.gif");
        let mut config = CaptureConfig::new(200);
        config.max_consecutive_failures = 0;
        let limits = RecordingLimits {
            error_budget: Some(2),
            ..Default::default()
        };
        let rec = recorder(small().with_fault_every(1), config, limits, output.clone());

        let err = rec.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RecordError::ErrorBudgetExceeded { errors: 3 }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_terminal_source_failure_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("dead.gif");
        let mut config = CaptureConfig::new(200);
        config.max_consecutive_failures = 2;
        let rec = recorder(small().with_fault_every(1), config, RecordingLimits::default(), output.clone());

        let err = rec.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RecordError::Encode(EncodeError::NoFrames)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_startup_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(
            small().with_startup_failure("permission denied"),
            CaptureConfig::new(15),
            RecordingLimits::default(),
            dir.path().join("never.gif"),
        );

        let err = rec.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, RecordError::Capture(CaptureError::StartupFailure(_))));
    }

    #[tokio::test]
    async fn test_slow_device_open_does_not_stall_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(
            small().with_frames(2).with_open_delay(Duration::from_millis(400)),
            CaptureConfig::new(100),
            RecordingLimits::default(),
            dir.path().join("slow.gif"),
        );

        let began = Instant::now();
        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            began.elapsed()
        });

        let summary = rec.run(std::future::pending()).await.unwrap();
        assert_eq!(summary.frames, 2);
        assert!(ticker.await.unwrap() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_source_is_stopped_after_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::new(100);
        let source = Arc::new(CaptureSource::new(small().with_frames(2), config));
        let encoder = GifEncoder::new(dir.path().join("two.gif"), 100, QualityLevel::High);

        Recorder::new(Arc::clone(&source), encoder, RecordingLimits::default())
            .run(std::future::pending())
            .await
            .unwrap();
        assert_eq!(source.state(), SourceState::Stopped);
    }
}
