use std::fs::File;
use std::time::Duration;

use witness::capture::{CaptureConfig, CaptureSource, Fill, FrameSource, Region, SourceState, Synthetic};
use witness::encoder::{frame_delay, GifEncoder, QualityLevel};
use witness::pipeline::{Recorder, RecordingLimits, StopReason};
use witness::regions::RegionStore;
use witness::Settings;

fn decode(path: &std::path::Path) -> (u16, u16, Vec<(u16, u16, u16)>) {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options.read_info(File::open(path).unwrap()).unwrap();
    let (w, h) = (decoder.width(), decoder.height());
    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().unwrap() {
        frames.push((frame.width, frame.height, frame.delay));
    }
    (w, h, frames)
}

#[tokio::test]
async fn synthetic_region_recording_to_gif() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("region.gif");

    let region: Region = "40,30,48,32".parse().unwrap();
    let config = CaptureConfig::new(20).with_region(region);
    let synthetic = Synthetic::default().with_fill(Fill::Gradient).with_frames(6);
    let encoder = GifEncoder::new(output.clone(), 20, QualityLevel::Medium);

    let summary = Recorder::new(CaptureSource::new(synthetic, config), encoder, RecordingLimits::default())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.reason, StopReason::SourceExhausted);
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.output, output);

    let (w, h, frames) = decode(&output);
    assert_eq!((w, h), (48, 32));
    assert_eq!(frames.len(), 6);
    assert!(frames.iter().all(|&(fw, fh, delay)| (fw, fh) == (48, 32) && delay == frame_delay(20)));
    assert_eq!(frame_delay(20), 5);
}

#[tokio::test]
async fn settings_drive_a_limited_session() {
    let dir = tempfile::tempdir().unwrap();
    let toml = dir.path().join("witness.toml");
    std::fs::write(
        &toml,
        "[capture]\nfps = 50\n\n[encoder]\nquality = \"low\"\n\n[recording]\nmax_frames = 4\n",
    )
    .unwrap();
    let settings = Settings::load(Some(&toml)).unwrap();

    let output = dir.path().join("limited.gif");
    let source = CaptureSource::new(
        Synthetic::default().with_size(24, 16),
        settings.capture_config(None),
    );
    let encoder = GifEncoder::new(output.clone(), settings.capture.fps, settings.encoder.quality);

    let summary = Recorder::new(source, encoder, settings.limits())
        .run(tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(summary.reason, StopReason::FrameLimit);
    assert_eq!(summary.frames, 4);
    let (_, _, frames) = decode(&output);
    assert_eq!(frames.len(), 4);
    assert!(frames.iter().all(|&(_, _, delay)| delay == 2));
}

#[test]
fn saved_region_feeds_capture_config() {
    let dir = tempfile::tempdir().unwrap();
    let store = RegionStore::new(dir.path().join("regions.json"));
    store.save("demo", "100,200,800,600".parse().unwrap()).unwrap();
    store.set_default("demo").unwrap();

    let config = Settings::default().capture_config(Some(store.default_region().unwrap()));
    assert_eq!(config.region.map(|r| (r.width(), r.height())), Some((800, 600)));

    let source = CaptureSource::new(Synthetic::default().with_frames(1), config);
    assert_eq!(source.state(), SourceState::Idle);
    let frames = source.frames();
    source.start().unwrap();
    let first = frames.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first.image.dimensions(), (800, 600));
    source.stop().unwrap();
    assert_eq!(source.state(), SourceState::Stopped);
}
