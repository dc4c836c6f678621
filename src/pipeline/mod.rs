pub mod recorder;

pub use recorder::{Recorder, RecordingLimits, RecordingSummary, StopReason};
