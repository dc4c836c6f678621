use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use witness::capture::Region;
use witness::encoder::QualityLevel;
use witness::Settings;

#[derive(Parser)]
#[command(name = "witness")]
#[command(about = "Record a screen region into a compact looping GIF", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to ~/.config/witness/witness.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record the screen to an animated GIF until Ctrl-C or a limit is hit
    Gif {
        /// Output file
        #[arg(short, long, default_value = "output.gif")]
        output: PathBuf,

        /// Capture rectangle as x,y,width,height
        #[arg(short = 'r', long = "rect", conflicts_with = "region", allow_hyphen_values = true)]
        rect: Option<Region>,

        /// Saved region name
        #[arg(long)]
        region: Option<String>,

        /// Display index, 0 for the primary display
        #[arg(long)]
        display: Option<u32>,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Encode a generated gradient animation through the same pipeline
    Demo {
        /// Output file
        #[arg(short, long, default_value = "demo.gif")]
        output: PathBuf,

        #[arg(long, default_value_t = 320)]
        width: u32,

        #[arg(long, default_value_t = 240)]
        height: u32,

        /// Frames to generate
        #[arg(long, default_value_t = 45)]
        frames: u64,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// List saved regions
    Regions {
        /// Remove a saved region
        #[arg(long, value_name = "NAME", conflicts_with = "default")]
        delete: Option<String>,

        /// Make a saved region the default
        #[arg(long, value_name = "NAME")]
        default: Option<String>,
    },

    /// Save a named capture region
    SaveRegion {
        name: String,

        /// Rectangle as x,y,width,height
        #[arg(allow_hyphen_values = true)]
        region: Region,

        /// Also make it the default region
        #[arg(long)]
        default: bool,
    },
}

/// Flags that override the loaded settings for one session.
#[derive(Args)]
pub struct Tuning {
    /// Frames per second
    #[arg(short, long)]
    pub fps: Option<u32>,

    #[arg(short, long, value_enum)]
    pub quality: Option<QualityLevel>,

    /// Stop after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    pub duration: Option<u64>,
}

impl Tuning {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(fps) = self.fps {
            settings.capture.fps = fps;
        }
        if let Some(quality) = self.quality {
            settings.encoder.quality = quality;
        }
        if let Some(max_frames) = self.max_frames {
            settings.recording.max_frames = Some(max_frames);
        }
        if let Some(duration) = self.duration {
            settings.recording.max_duration_secs = Some(duration);
        }
    }
}
