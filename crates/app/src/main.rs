use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pipewire_controller_core::{
    AppConfig, InstanceGuard, ReconciliationEngine, SystemRunner, BUFFER_SIZES,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

fn main() -> pipewire_controller_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match cli.config_dir {
        Some(dir) => AppConfig::with_config_dir(dir),
        None => AppConfig::from_user_dirs()?,
    };
    let engine = ReconciliationEngine::new(&config, Arc::new(SystemRunner::new()));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(&config, engine),
        Commands::Status => show_status(engine),
        Commands::Rates => list_rates(engine),
        Commands::SetRate { rate } => set_rate(engine, rate),
        Commands::SetQuantum { size } => set_quantum(engine, size),
    }
}

fn run_daemon(
    config: &AppConfig,
    engine: ReconciliationEngine,
) -> pipewire_controller_core::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, engine))
}

async fn serve(
    config: &AppConfig,
    mut engine: ReconciliationEngine,
) -> pipewire_controller_core::Result<()> {
    // Handlers must exist before the identity file names this process.
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let guard = InstanceGuard::new(config);
    let handover = guard.ensure_single_instance()?;
    tracing::info!(?handover, pid = std::process::id(), "controller started");

    let report = engine.initialize();
    let preferences = engine.preferences();
    tracing::info!(
        rate = preferences.sample_rate,
        quantum = preferences.buffer_size,
        applied = report.is_complete(),
        supported = ?engine.capabilities().as_slice(),
        "startup settings applied"
    );

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = hangup.recv() => {
                let report = engine.reapply();
                tracing::info!(applied = report.is_complete(), "received SIGHUP, settings reapplied");
            }
        }
    }

    guard.cleanup();
    Ok(())
}

fn show_status(mut engine: ReconciliationEngine) -> pipewire_controller_core::Result<()> {
    let preferences = engine.load_preferences();
    let live = engine.live_state();

    println!(
        "stored:  {} Hz @ {} frames",
        preferences.sample_rate, preferences.buffer_size
    );
    println!(
        "forced:  {} Hz @ {} frames",
        display_or_unset(live.rate),
        display_or_unset(live.quantum)
    );
    if let Some(device) = live.device {
        println!("device:  {device}");
    }
    Ok(())
}

fn list_rates(mut engine: ReconciliationEngine) -> pipewire_controller_core::Result<()> {
    for rate in engine.refresh_capabilities().iter() {
        println!("{rate}");
    }
    Ok(())
}

fn set_rate(
    mut engine: ReconciliationEngine,
    rate: u32,
) -> pipewire_controller_core::Result<()> {
    engine.load_preferences();
    let supported = engine.refresh_capabilities().contains(rate);
    if !supported {
        tracing::warn!(rate, "sample rate is not advertised by the attached hardware");
    }

    if engine.change_rate(rate) {
        println!("sample rate set to {rate} Hz");
        Ok(())
    } else {
        Err(format!("audio server did not accept sample rate {rate}").into())
    }
}

fn set_quantum(
    mut engine: ReconciliationEngine,
    size: u32,
) -> pipewire_controller_core::Result<()> {
    engine.load_preferences();
    if !BUFFER_SIZES.contains(&size) {
        tracing::warn!(size, choices = ?BUFFER_SIZES, "unusual buffer size requested");
    }

    if engine.change_quantum(size) {
        println!("buffer size set to {size} frames");
        Ok(())
    } else {
        Err(format!("audio server did not accept buffer size {size}").into())
    }
}

fn display_or_unset(value: Option<u32>) -> String {
    value.map_or_else(|| "unset".to_string(), |v| v.to_string())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps PipeWire's sample rate and buffer size where you left them", long_about = None)]
struct Cli {
    /// Directory holding settings.json and app.pid (defaults to the user config dir).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace any running controller, apply stored settings and stay resident.
    Run,
    /// Show stored preferences next to the values the audio server reports.
    Status,
    /// List the sample rates the attached hardware supports.
    Rates,
    /// Force a new sample rate and remember it.
    SetRate {
        /// Sample rate in Hz.
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        rate: u32,
    },
    /// Force a new buffer size (quantum) and remember it.
    SetQuantum {
        /// Buffer size in frames.
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        size: u32,
    },
}
