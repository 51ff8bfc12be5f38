//! xapu - standalone APU host
//!
//! Realizes one APU with a tone mixer, starts its frame clock in free-running
//! mode and plays the result through the host audio device. Without an audio
//! device the pipeline still runs; frames just collect in the FIFO.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xapu_common::config::{TomlConfig, CONFIG_ENV_VAR};
use xapu_core::audio::AudioOutput;
use xapu_core::mixer::ToneMixer;
use xapu_core::regs::{
    set_mask, NV_PAPU_FECTL, NV_PAPU_FECTL_FEMETHMODE_FREE_RUNNING, NV_PAPU_SECTL,
    NV_PAPU_SECTL_XCNTMODE, NV_PAPU_SECTL_XCNTMODE_FRAME,
};
use xapu_core::{Apu, ApuConfig, ApuDeps, MmioDevice, RunState};

/// Command-line arguments for xapu
#[derive(Parser, Debug)]
#[command(name = "xapu")]
#[command(about = "Emulated audio processing unit")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Output device name (overrides the config file)
    #[arg(short, long)]
    device: Option<String>,

    /// Tone frequency in Hz
    #[arg(long, default_value = "440")]
    tone_hz: f64,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    seconds: Option<u64>,

    /// Seconds between statistics log lines
    #[arg(long, default_value = "5")]
    stats_interval: u64,

    /// Do not open a host audio device
    #[arg(long)]
    no_audio: bool,

    /// Print the host's output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn init_logging(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("xapu_core={0},xapu={0},xapu_common={0}", config.logging.level).into());

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let toml_config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&toml_config)?;

    info!(
        "Starting xapu {} ({}, {} build, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    let config = ApuConfig::from_toml(&toml_config).context("Invalid APU configuration")?;
    let sample_rate = config.geometry.sample_rate;
    let audio_samples = config.audio_samples as u32;

    let mixer = ToneMixer::new(args.tone_hz, 0.25, sample_rate);
    let apu = Arc::new(Apu::new(config, ApuDeps::detached(Box::new(mixer))).context("Failed to realize APU")?);

    // Frame clock on, front end free-running
    apu.write(
        NV_PAPU_SECTL as u64,
        4,
        set_mask(0, NV_PAPU_SECTL_XCNTMODE, NV_PAPU_SECTL_XCNTMODE_FRAME) as u64,
    );
    apu.write(NV_PAPU_FECTL as u64, 4, NV_PAPU_FECTL_FEMETHMODE_FREE_RUNNING as u64);

    let device = args.device.or_else(|| toml_config.audio.device.clone());
    let mut output = if args.no_audio {
        info!("Host audio disabled");
        None
    } else {
        match AudioOutput::open(device.as_deref(), sample_rate, audio_samples) {
            Ok(mut output) => {
                info!(
                    "Audio device: {} at {} Hz, {} byte buffer",
                    output.device_name(),
                    output.sample_rate(),
                    output.buffer_bytes()
                );
                let marks = apu.attach_backend(output.buffer_bytes())?;
                info!("Watermarks: low={} high={}", marks.low, marks.high);
                match output.start(apu.sink()) {
                    Ok(()) => Some(output),
                    Err(e) => {
                        warn!("Failed to start audio stream, continuing without audio: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("No audio backend available, continuing without audio: {}", e);
                None
            }
        }
    };

    apu.set_run_state(RunState::Running)?;

    let seconds = args.seconds;
    let run_for = async move {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(run_for);

    let mut stats_tick = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut run_for => {
                info!("Run time elapsed");
                break;
            }
            _ = stats_tick.tick() => {
                let stats = apu.stats_snapshot();
                info!("{}", serde_json::to_string(&stats)?);
                if let Some(o) = output.as_ref().filter(|o| o.has_error()) {
                    warn!("Audio stream reported {} errors", o.error_count());
                }
            }
        }
    }

    apu.set_run_state(RunState::Shutdown)?;
    if let Some(mut output) = output.take() {
        output.stop()?;
    }
    drop(apu);

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
