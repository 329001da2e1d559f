//! EMG Recorder CLI
//!
//! Records windowed armband EMG with smoothed energy to CSV logs.

use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use emg_recorder::{
    collector::Collector,
    config::Config,
    core::{EnergyDivisor, LifecycleController, LogFormat, WindowFlusher},
    diagnostics::create_shared_diagnostics_with_persistence,
    RecorderError, VERSION,
};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emg-recorder")]
#[command(version = VERSION)]
#[command(about = "Windowed EMG recording with smoothed energy logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the armband and record until interrupted
    Record(RecordArgs),

    /// Show configuration and cumulative diagnostics
    Status,

    /// Show configuration
    Config,
}

#[derive(Args)]
struct RecordArgs {
    /// Directory for the CSV logs
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Flush interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Samples buffered per window
    #[arg(long)]
    window: Option<usize>,

    /// Log layout (legacy or timestamped)
    #[arg(long)]
    format: Option<LogFormat>,

    /// Energy normalization (fixed or available)
    #[arg(long)]
    divisor: Option<EnergyDivisor>,

    /// Seconds to wait for the armband
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Armband sample rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Drop and re-establish the session every N seconds
    #[arg(long)]
    dropout_secs: Option<f64>,

    /// Delay before the armband pairs, in milliseconds
    #[arg(long)]
    connect_delay_ms: Option<u64>,

    /// Seed for the simulated signal
    #[arg(long)]
    seed: Option<u64>,

    /// Print every flushed record
    #[arg(long)]
    echo: bool,

    /// Stop after the first flush cycle
    #[arg(long)]
    once: bool,

    /// Exit on fatal errors without waiting for Enter
    #[arg(long)]
    no_prompt: bool,
}

impl RecordArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(ref output) = self.output {
            config.output_dir = output.clone();
        }
        if let Some(ms) = self.poll_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(window) = self.window {
            config.window_capacity = window;
        }
        if let Some(format) = self.format {
            config.log_format = format;
        }
        if let Some(divisor) = self.divisor {
            config.energy_divisor = divisor;
        }
        if let Some(secs) = self.timeout_secs {
            config.acquisition_timeout = Duration::from_secs(secs);
        }
        if let Some(rate) = self.rate {
            config.armband.sample_rate_hz = rate;
        }
        if let Some(secs) = self.dropout_secs {
            config.armband.dropout_every = (secs > 0.0).then(|| Duration::from_secs_f64(secs));
        }
        if let Some(ms) = self.connect_delay_ms {
            config.armband.connect_delay = Duration::from_millis(ms);
        }
        if self.seed.is_some() {
            config.armband.seed = self.seed;
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let (result, prompt) = match cli.command {
        Commands::Record(args) => {
            let prompt = !args.no_prompt && io::stdin().is_terminal();
            (cmd_record(args), prompt)
        }
        Commands::Status => (cmd_status(), false),
        Commands::Config => (cmd_config(), false),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if prompt {
                eprint!("Press enter to continue.");
                let _ = io::stdin().lock().read_line(&mut String::new());
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("emg_recorder=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        warn!("Could not load configuration, using defaults: {e}");
        Config::default()
    })
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let mut config = load_config();
    args.apply(&mut config);
    config.validate().context("invalid recording settings")?;
    if let Err(e) = config.ensure_directories() {
        warn!("Could not create directories: {e}");
    }

    println!("EMG Recorder v{VERSION}");
    println!();
    println!("  Window: {} samples", config.window_capacity);
    println!(
        "  Smoothing: {} samples ({:?} divisor)",
        config.smoothing_len, config.energy_divisor
    );
    println!("  Flush interval: {}ms", config.poll_interval.as_millis());
    println!("  Log format: {:?}", config.log_format);
    println!("  Output: {}", config.output_dir.display());
    println!();

    let diagnostics = create_shared_diagnostics_with_persistence(config.diagnostics_path());

    println!("Attempting to find an armband...");
    let mut collector = Collector::new(config.armband.clone());
    collector.start().context("failed to start armband session")?;
    collector.wait_for_armband(config.acquisition_timeout)?;
    println!("Connected to an armband!");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let flusher = if args.echo {
        WindowFlusher::new().with_echo(Box::new(io::stdout()))
    } else {
        WindowFlusher::new()
    };
    let mut recorder = LifecycleController::new(&config, Arc::clone(&diagnostics)).with_flusher(flusher);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    let receiver = collector.receiver().clone();
    let mut last_flush = Instant::now();
    let mut consecutive_failures = 0u32;
    let mut abort: Option<RecorderError> = None;

    while running.load(Ordering::SeqCst) {
        let wait = config.poll_interval.saturating_sub(last_flush.elapsed());
        match receiver.recv_timeout(wait) {
            Ok(event) => {
                event.dispatch(&mut recorder);
                if let Some(e) = recorder.take_error() {
                    eprintln!("Warning: {e}; retrying at next flush");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("Armband session ended unexpectedly");
                break;
            }
        }

        if last_flush.elapsed() < config.poll_interval {
            continue;
        }
        last_flush = Instant::now();

        match recorder.drain_and_flush() {
            Ok(report) => {
                consecutive_failures = 0;
                if report.records > 0 {
                    let current = if recorder.is_connected() {
                        format!("{:?}", recorder.snapshot())
                    } else {
                        "disconnected".to_string()
                    };
                    println!(
                        "[{}] Flushed {} samples | peak energy {:.1} | current {current}",
                        Local::now().format("%H:%M:%S"),
                        report.records,
                        report.peak_smoothed,
                    );
                }
            }
            Err(RecorderError::NoDestination) => {
                debug!("No session yet, nothing to flush");
            }
            Err(e) => {
                consecutive_failures += 1;
                eprintln!(
                    "Warning: flush failed ({consecutive_failures}/{}): {e}",
                    config.max_consecutive_flush_failures
                );
                if consecutive_failures >= config.max_consecutive_flush_failures {
                    abort = Some(e);
                    break;
                }
            }
        }

        if args.once {
            break;
        }
    }

    println!();
    println!("Stopping recording...");
    collector.stop();
    while let Some(event) = collector.try_recv() {
        event.dispatch(&mut recorder);
    }

    let log_path = recorder.destination_path().map(|p| p.to_path_buf());
    match recorder.shutdown() {
        Ok(report) if report.records > 0 => {
            println!("Flushed final {} samples", report.records);
        }
        Ok(_) => {}
        Err(e) => eprintln!("Error flushing final samples: {e}"),
    }
    if let Some(path) = log_path {
        println!("Last log: {}", path.display());
    }

    if let Err(e) = diagnostics.save() {
        eprintln!("Warning: Could not save diagnostics: {e}");
    }
    println!();
    println!("{}", diagnostics.summary());

    match abort {
        Some(e) => Err(e).context("recording aborted after repeated flush failures"),
        None => Ok(()),
    }
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("EMG Recorder Status");
    println!("===================");
    println!();
    println!("Configuration:");
    println!("  Window: {} samples", config.window_capacity);
    println!("  Smoothing: {} samples", config.smoothing_len);
    println!("  Divisor: {:?}", config.energy_divisor);
    println!("  Log format: {:?}", config.log_format);
    println!("  Output: {}", config.output_dir.display());
    println!();

    let logs: Vec<PathBuf> = std::fs::read_dir(&config.output_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default();
    println!("Log files: {}", logs.len());
    if let Some(latest) = logs.iter().max() {
        println!("  Latest: {}", latest.display());
    }
    println!();

    let stats_path = config.diagnostics_path();
    if !stats_path.exists() {
        println!("No previous session data found.");
        return Ok(());
    }
    let content = std::fs::read_to_string(&stats_path)
        .with_context(|| format!("failed to read {}", stats_path.display()))?;
    let stats: serde_json::Value =
        serde_json::from_str(&content).context("diagnostics file is not valid JSON")?;

    println!("Cumulative Statistics:");
    for key in [
        "samples_received",
        "samples_appended",
        "samples_dropped",
        "samples_discarded",
        "records_written",
        "windows_flushed",
        "flush_failures",
        "connects",
        "disconnects",
        "logs_opened",
    ] {
        if let Some(value) = stats.get(key) {
            println!("  {}: {value}", key.replace('_', " "));
        }
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")
}
