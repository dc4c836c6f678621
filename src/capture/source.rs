//! Frame source lifecycle and the paced production loop

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbaImage;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::frame::{CaptureConfig, Frame};
use crate::error::CaptureError;

/// Capability contract every frame producer exposes to the recorder.
///
/// Both streams are single-pass: once the source stops and the queued items
/// are drained, the receivers report disconnection.
pub trait FrameSource: Send + Sync {
    fn start(&self) -> Result<(), CaptureError>;

    fn stop(&self) -> Result<(), CaptureError>;

    fn frames(&self) -> Receiver<Frame>;

    fn errors(&self) -> Receiver<CaptureError>;

    fn state(&self) -> SourceState;

    fn is_running(&self) -> bool {
        self.state() == SourceState::Running
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn start(&self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn stop(&self) -> Result<(), CaptureError> {
        (**self).stop()
    }

    fn frames(&self) -> Receiver<Frame> {
        (**self).frames()
    }

    fn errors(&self) -> Receiver<CaptureError> {
        (**self).errors()
    }

    fn state(&self) -> SourceState {
        (**self).state()
    }
}

/// Opens an acquisition device. `open` runs on the production thread, so the
/// returned grabber does not need to be `Send`.
pub trait Acquire: Send + Sync + 'static {
    type Grabber: Grab;

    fn open(&self, config: &CaptureConfig) -> Result<Self::Grabber, CaptureError>;
}

pub trait Grab {
    /// Acquire one image. `Ok(None)` means the device is exhausted.
    fn grab(&mut self) -> Result<Option<RgbaImage>, CaptureError>;
}

/// Legal transitions are `Idle -> Running -> Stopped` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Running,
    Stopped,
}

#[derive(Clone)]
struct Outlets {
    frames: Sender<Frame>,
    errors: Sender<CaptureError>,
}

enum Lifecycle {
    Idle {
        outlets: Outlets,
    },
    /// The device is being opened on the capture thread. The lock is not
    /// held meanwhile; the outlets come back if opening fails.
    Starting,
    Running {
        // Dropping the sender is the stop signal.
        shutdown: Sender<()>,
        worker: JoinHandle<()>,
    },
    Stopped,
}

/// Generic frame source: owns the lifecycle state machine and the two bounded
/// channels, and drives any [`Acquire`] implementation at the configured rate.
///
/// The frame channel blocks the producer when full; frames are never dropped.
pub struct CaptureSource<A: Acquire> {
    acquire: Arc<A>,
    config: CaptureConfig,
    frames: Receiver<Frame>,
    errors: Receiver<CaptureError>,
    lifecycle: Mutex<Lifecycle>,
}

impl<A: Acquire> CaptureSource<A> {
    pub fn new(acquire: A, config: CaptureConfig) -> Self {
        let capacity = config.buffer_frames.max(1);
        let (frames_tx, frames_rx) = flume::bounded(capacity);
        let (errors_tx, errors_rx) = flume::bounded(capacity);

        Self {
            acquire: Arc::new(acquire),
            config,
            frames: frames_rx,
            errors: errors_rx,
            lifecycle: Mutex::new(Lifecycle::Idle {
                outlets: Outlets {
                    frames: frames_tx,
                    errors: errors_tx,
                },
            }),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the capture thread and waits until the device is open.
    fn spawn_worker(
        &self,
        outlets: Outlets,
    ) -> Result<(Sender<()>, JoinHandle<()>), CaptureError> {
        let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
        let (ready_tx, ready_rx) = flume::bounded::<Result<(), CaptureError>>(1);
        let acquire = Arc::clone(&self.acquire);
        let config = self.config.clone();

        let worker = thread::Builder::new()
            .name("witness-capture".into())
            .spawn(move || {
                let grabber = match acquire.open(&config) {
                    Ok(grabber) => {
                        let _ = ready_tx.send(Ok(()));
                        grabber
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                Producer {
                    grabber,
                    outlets,
                    shutdown: shutdown_rx,
                    config,
                }
                .run();
            })
            .map_err(|e| CaptureError::StartupFailure(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok((shutdown_tx, worker)),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(match e {
                    e @ CaptureError::StartupFailure(_) => e,
                    other => CaptureError::StartupFailure(other.to_string()),
                })
            }
            Err(_) => {
                let _ = worker.join();
                Err(CaptureError::StartupFailure(
                    "capture thread exited during startup".into(),
                ))
            }
        }
    }
}

impl<A: Acquire> FrameSource for CaptureSource<A> {
    #[instrument(skip(self), fields(fps = self.config.fps, display = %self.config.display))]
    fn start(&self) -> Result<(), CaptureError> {
        let outlets = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Idle { outlets } => outlets,
                previous => {
                    let err = match previous {
                        Lifecycle::Stopped => CaptureError::AlreadyStopped,
                        _ => CaptureError::AlreadyRunning,
                    };
                    *lifecycle = previous;
                    return Err(err);
                }
            }
        };

        match self.spawn_worker(outlets.clone()) {
            Ok((shutdown, worker)) => {
                // Dropping our copy of the outlets leaves the worker with the
                // only senders, so the channels close when it exits.
                drop(outlets);
                *self.lock() = Lifecycle::Running { shutdown, worker };
                info!("Capture started");
                Ok(())
            }
            Err(e) => {
                *self.lock() = Lifecycle::Idle { outlets };
                warn!("Capture startup failed: {}", e);
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<(), CaptureError> {
        let mut lifecycle = self.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { shutdown, worker } => {
                drop(shutdown);
                if worker.join().is_err() {
                    error!("Capture thread panicked");
                }
                info!("Capture stopped");
                Ok(())
            }
            previous => {
                *lifecycle = previous;
                Err(CaptureError::NotRunning)
            }
        }
    }

    fn frames(&self) -> Receiver<Frame> {
        self.frames.clone()
    }

    fn errors(&self) -> Receiver<CaptureError> {
        self.errors.clone()
    }

    fn state(&self) -> SourceState {
        match &*self.lock() {
            Lifecycle::Idle { .. } | Lifecycle::Starting => SourceState::Idle,
            Lifecycle::Running { .. } => SourceState::Running,
            Lifecycle::Stopped => SourceState::Stopped,
        }
    }
}

impl<A: Acquire> Drop for CaptureSource<A> {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

/// The production loop, run on the capture thread.
struct Producer<G> {
    grabber: G,
    outlets: Outlets,
    shutdown: Receiver<()>,
    config: CaptureConfig,
}

impl<G: Grab> Producer<G> {
    fn run(mut self) {
        let interval = self.config.frame_interval();
        let max_failures = self.config.max_consecutive_failures;
        let mut sequence = 0u64;
        let mut consecutive = 0u32;
        let mut next_tick = Instant::now();

        loop {
            match self.shutdown.recv_deadline(next_tick) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => {
                    debug!("Shutdown signal received");
                    break;
                }
            }
            next_tick = (next_tick + interval).max(Instant::now());

            match self.grabber.grab() {
                Ok(Some(image)) => {
                    consecutive = 0;
                    let frame = Frame::new(image, sequence);
                    sequence += 1;
                    metrics::counter!("witness_frames_captured_total").increment(1);
                    if !self.deliver(frame) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Acquisition exhausted");
                    break;
                }
                Err(e) => {
                    consecutive += 1;
                    metrics::counter!("witness_capture_errors_total").increment(1);
                    if max_failures > 0 && consecutive >= max_failures {
                        error!("Giving up after {} consecutive failures: {}", consecutive, e);
                        self.report_terminal(CaptureError::SourceFailed { consecutive });
                        break;
                    }
                    self.report(e);
                }
            }
        }

        info!(frames = sequence, "Capture loop finished");
    }

    /// Blocks until the consumer has room or a stop is requested.
    fn deliver(&self, frame: Frame) -> bool {
        flume::Selector::new()
            .send(&self.outlets.frames, frame, |sent| sent.is_ok())
            .recv(&self.shutdown, |_| false)
            .wait()
    }

    /// Per-frame faults are advisory; a full error queue drops the report.
    fn report(&self, err: CaptureError) {
        match self.outlets.errors.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => warn!("Error queue full, dropping: {}", err),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn report_terminal(&self, err: CaptureError) {
        flume::Selector::new()
            .send(&self.outlets.errors, err, |_| ())
            .recv(&self.shutdown, |_| ())
            .wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::Synthetic;
    use crate::capture::Region;
    use std::time::Duration;

    fn source(synthetic: Synthetic, fps: u32) -> CaptureSource<Synthetic> {
        CaptureSource::new(synthetic, CaptureConfig::new(fps))
    }

    fn drain(rx: &Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.recv_timeout(Duration::from_secs(5)) {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let source = source(Synthetic::default(), 15);
        assert_eq!(source.state(), SourceState::Idle);

        source.start().unwrap();
        assert!(source.is_running());
        assert!(matches!(source.start(), Err(CaptureError::AlreadyRunning)));

        source.stop().unwrap();
        assert_eq!(source.state(), SourceState::Stopped);
        assert!(matches!(source.stop(), Err(CaptureError::NotRunning)));
        assert!(matches!(source.start(), Err(CaptureError::AlreadyStopped)));
    }

    #[test]
    fn test_stop_before_start() {
        let source = source(Synthetic::default(), 15);
        assert!(matches!(source.stop(), Err(CaptureError::NotRunning)));
        assert_eq!(source.state(), SourceState::Idle);
        source.start().unwrap();
        source.stop().unwrap();
    }

    #[test]
    fn test_emits_exact_frame_count_then_closes() {
        let source = source(Synthetic::default().with_frames(5), 30);
        let frames = source.frames();
        source.start().unwrap();

        let received = drain(&frames);
        assert_eq!(received.len(), 5);
        assert!(frames.is_disconnected());
    }

    #[test]
    fn test_frames_arrive_in_production_order() {
        let source = source(Synthetic::default().with_frames(8), 200);
        let frames = source.frames();
        source.start().unwrap();

        let received = drain(&frames);
        let sequences: Vec<u64> = received.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, (0..8).collect::<Vec<_>>());
        assert!(received.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_region_sets_frame_size() {
        let config = CaptureConfig::new(30).with_region(Region::new(100, 100, 80, 60).unwrap());
        let source = CaptureSource::new(Synthetic::default().with_frames(1), config);
        let frames = source.frames();
        source.start().unwrap();

        let frame = frames.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((frame.width(), frame.height()), (80, 60));
    }

    #[test]
    fn test_startup_failure_keeps_source_idle() {
        let source = source(Synthetic::default().with_startup_failure("permission denied"), 15);
        let err = source.start().unwrap_err();
        assert!(matches!(err, CaptureError::StartupFailure(ref msg) if msg.contains("permission denied")));
        assert_eq!(source.state(), SourceState::Idle);
        assert!(!source.frames().is_disconnected());
    }

    #[test]
    fn test_backpressure_blocks_instead_of_dropping() {
        let mut config = CaptureConfig::new(200);
        config.buffer_frames = 1;
        let source = CaptureSource::new(Synthetic::default().with_size(4, 4).with_frames(6), config);
        let frames = source.frames();
        source.start().unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(frames.len() <= 1);

        let sequences: Vec<u64> = drain(&frames).iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_unblocks_full_producer() {
        let mut config = CaptureConfig::new(200);
        config.buffer_frames = 1;
        let source = CaptureSource::new(Synthetic::default().with_size(4, 4), config);
        let frames = source.frames();
        source.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        source.stop().unwrap();
        assert!(frames.is_disconnected());
        assert!(frames.drain().count() <= 1);
    }

    #[test]
    fn test_per_frame_faults_do_not_end_session() {
        let source = source(Synthetic::default().with_frames(4).with_fault_every(2), 200);
        let frames = source.frames();
        let errors = source.errors();
        source.start().unwrap();

        assert_eq!(drain(&frames).len(), 4);
        let faults: Vec<CaptureError> = errors.drain().collect();
        assert_eq!(faults.len(), 3);
        assert!(faults.iter().all(|e| matches!(e, CaptureError::Acquisition(_))));
    }

    #[test]
    fn test_repeated_faults_are_terminal() {
        let mut config = CaptureConfig::new(200);
        config.max_consecutive_failures = 3;
        let source = CaptureSource::new(Synthetic::default().with_fault_every(1), config);
        let frames = source.frames();
        let errors = source.errors();
        source.start().unwrap();

        assert!(drain(&frames).is_empty());
        let faults: Vec<CaptureError> = errors.iter().collect();
        assert_eq!(faults.len(), 3);
        assert!(faults.last().is_some_and(CaptureError::is_terminal));
    }

    #[test]
    fn test_concurrent_start_and_stop() {
        let source = Arc::new(source(Synthetic::default().with_size(4, 4), 100));
        let frames = source.frames();

        let starts: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || source.start().is_ok())
            })
            .collect();
        let started = starts.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(started, 1);
        assert!(source.is_running());

        let stops: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || source.stop().is_ok())
            })
            .collect();
        let stopped = stops.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(stopped, 1);

        assert_eq!(source.state(), SourceState::Stopped);
        assert!(frames.is_disconnected());
        assert!(matches!(source.start(), Err(CaptureError::AlreadyStopped)));
    }

    #[test]
    fn test_slow_open_does_not_block_other_callers() {
        let synthetic = Synthetic::default()
            .with_size(4, 4)
            .with_open_delay(Duration::from_millis(600));
        let source = Arc::new(source(synthetic, 30));

        let starter = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || source.start())
        };
        std::thread::sleep(Duration::from_millis(100));

        let asked = Instant::now();
        assert_eq!(source.state(), SourceState::Idle);
        assert!(matches!(source.start(), Err(CaptureError::AlreadyRunning)));
        assert!(matches!(source.stop(), Err(CaptureError::NotRunning)));
        assert!(asked.elapsed() < Duration::from_millis(300));

        starter.join().unwrap().unwrap();
        assert!(source.is_running());
        source.stop().unwrap();
    }

    #[test]
    fn test_dropping_running_source_stops_it() {
        let source = source(Synthetic::default().with_size(4, 4), 100);
        let frames = source.frames();
        source.start().unwrap();
        drop(source);
        assert!(frames.is_disconnected());
    }
}
