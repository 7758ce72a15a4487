use axisfilter::config::AppConfig;
use axisfilter::lifecycle::{self, RunFlag};
use axisfilter::sensor::{
    DisplayMode, EvdevSource, EventSource, LoopExit, PipelineHandle, ReplaySource, TerminalSink,
};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Calibrated and Kalman-smoothed live readout of three input device axes
#[derive(Parser, Debug)]
#[command(name = "axisfilter", version)]
struct Args {
    /// TOML configuration file (default: <config dir>/axisfilter/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input device node, overrides `device_path` from the config
    #[arg(long)]
    device: Option<PathBuf>,

    /// Replay `code value` lines from a capture file instead of reading a device
    #[arg(long, conflicts_with = "device")]
    replay: Option<PathBuf>,

    /// Delay between replayed events in milliseconds
    #[arg(long, default_value_t = 10)]
    replay_interval_ms: u64,

    /// Read without taking exclusive access to the device
    #[arg(long)]
    no_grab: bool,

    /// Which values to show on the status line
    #[arg(long, value_enum)]
    display: Option<DisplayMode>,

    /// Status line refresh interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.verbose)?;

    if args.write_default_config {
        let path = args
            .config
            .clone()
            .or_else(AppConfig::default_path)
            .ok_or_else(|| eyre!("No config path given and no config directory available"))?;
        AppConfig::default().save(&path)?;
        return Ok(());
    }

    let config = load_config(&args)?;
    debug!("Effective configuration: {:?}", config);

    let source: Box<dyn EventSource> = match &args.replay {
        Some(path) => Box::new(
            ReplaySource::from_file(path)?
                .with_pacing(Duration::from_millis(args.replay_interval_ms)),
        ),
        None => Box::new(EvdevSource::open(&config.device_path)?),
    };

    let running = RunFlag::new();
    let interrupt_watcher = lifecycle::watch_interrupts(running.clone());

    let pipeline = PipelineHandle::spawn(
        config.build_store(),
        source,
        Box::new(TerminalSink::stdout(config.reporter.display)),
        running,
        config.pipeline_settings(),
    )
    .map_err(|e| eyre!("Failed to start pipeline: {}", e))?;

    let result = pipeline.wait().await;
    interrupt_watcher.abort();
    let report = result?;

    match report.exit {
        LoopExit::Stopped => info!("Stopped on request"),
        LoopExit::EndOfStream => info!("Input ended"),
    }
    println!("Shut down cleanly");
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load(args.config.as_deref())?;

    if let Some(device) = &args.device {
        config.device_path = device.clone();
    }
    if args.no_grab {
        config.exclusive_grab = false;
    }
    if let Some(display) = args.display {
        config.reporter.display = display;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.reporter.interval_ms = interval_ms;
    }

    config.validate()?;
    Ok(config)
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(verbose);
    Ok(())
}

fn setup_logging_env(verbose: bool) {
    // stdout belongs to the status line
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
