//! witness: screen region to looping GIF

mod cli;

use std::future::Future;
use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, Tuning};
use witness::capture::{Acquire, CaptureConfig, CaptureSource, Fill, Region, Synthetic};
use witness::encoder::GifEncoder;
use witness::pipeline::Recorder;
use witness::regions::RegionStore;
use witness::{RegionError, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("witness=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gif {
            output,
            rect,
            region,
            display,
            tuning,
        } => {
            let mut settings = load_settings(cli.config.as_deref(), &tuning)?;
            if let Some(display) = display {
                settings.capture.display = display;
            }
            let region = resolve_region(rect, region.as_deref())?;
            let config = settings.capture_config(region);
            record_screen(config, &settings, output).await
        }
        Commands::Demo {
            output,
            width,
            height,
            frames,
            tuning,
        } => {
            let settings = load_settings(cli.config.as_deref(), &tuning)?;
            let synthetic = Synthetic::default()
                .with_size(width, height)
                .with_fill(Fill::Gradient)
                .with_frames(frames);
            record(synthetic, settings.capture_config(None), &settings, output, shutdown_signal()).await
        }
        Commands::Regions { delete, default } => {
            let store = RegionStore::open_default()?;
            if let Some(name) = delete {
                store.delete(&name)?;
                println!("Deleted region '{}'", name);
            } else if let Some(name) = default {
                store.set_default(&name)?;
                println!("Default region is now '{}'", name);
            } else {
                list_regions(&store)?;
            }
            Ok(())
        }
        Commands::SaveRegion {
            name,
            region,
            default,
        } => {
            let store = RegionStore::open_default()?;
            store.save(&name, region)?;
            if default {
                store.set_default(&name)?;
            }
            println!("Saved {}", store.describe(&name)?);
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>, tuning: &Tuning) -> Result<Settings> {
    let mut settings = Settings::load(path).wrap_err("failed to load settings")?;
    tuning.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// `-r` wins over `--region`, which wins over the saved default. No region
/// at all records the full display.
fn resolve_region(rect: Option<Region>, name: Option<&str>) -> Result<Option<Region>> {
    pick_region(rect, name, RegionStore::open_default())
}

fn pick_region(
    rect: Option<Region>,
    name: Option<&str>,
    store: Result<RegionStore, RegionError>,
) -> Result<Option<Region>> {
    if rect.is_some() {
        return Ok(rect);
    }
    if let Some(name) = name {
        let region = store?
            .load(name)
            .wrap_err_with(|| format!("unknown region '{}', see `witness regions`", name))?;
        return Ok(Some(region));
    }
    let store = match store {
        Ok(store) => store,
        Err(e) => {
            debug!("No region store ({}), recording the full display", e);
            return Ok(None);
        }
    };
    match store.default_region() {
        Ok(region) => {
            info!("Using default region {}", region);
            Ok(Some(region))
        }
        Err(RegionError::NoDefault) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn list_regions(store: &RegionStore) -> Result<()> {
    let names = store.list()?;
    if names.is_empty() {
        println!("No saved regions. Add one with `witness save-region NAME x,y,w,h`.");
        return Ok(());
    }
    let default = store.default_name()?;
    for name in names {
        let marker = if default.as_deref() == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", store.describe(&name)?, marker);
    }
    Ok(())
}

#[cfg(feature = "screen")]
async fn record_screen(config: CaptureConfig, settings: &Settings, output: PathBuf) -> Result<()> {
    record(witness::capture::Screen, config, settings, output, shutdown_signal()).await
}

#[cfg(not(feature = "screen"))]
async fn record_screen(_config: CaptureConfig, _settings: &Settings, _output: PathBuf) -> Result<()> {
    Err(color_eyre::eyre::eyre!(
        "screen capture is not available in this build; rebuild with `--features screen`"
    ))
}

async fn record<A, F>(
    acquire: A,
    config: CaptureConfig,
    settings: &Settings,
    output: PathBuf,
    shutdown: F,
) -> Result<()>
where
    A: Acquire,
    F: Future<Output = ()>,
{
    let fps = config.fps;
    info!(
        "Recording at {} fps, {} quality, press Ctrl-C to stop",
        fps, settings.encoder.quality
    );

    let encoder = GifEncoder::new(output.clone(), fps, settings.encoder.quality);
    let source = CaptureSource::new(acquire, config);
    let summary = Recorder::new(source, encoder, settings.limits())
        .with_progress_every(u64::from(fps))
        .run(shutdown)
        .await
        .wrap_err_with(|| format!("recording to {} failed", output.display()))?;

    if summary.errors > 0 {
        warn!("{} capture errors during recording", summary.errors);
    }
    println!(
        "Saved {} frames to {} ({} KiB, {:.1}s)",
        summary.frames,
        summary.output.display(),
        summary.bytes / 1024,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix. Signals whose handler cannot be
/// installed are ignored; with none installed the session only ends on its
/// limits.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupt() => {}
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                interrupt().await;
            }
        }
    }
    #[cfg(not(unix))]
    interrupt().await;

    info!("Stopping");
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
