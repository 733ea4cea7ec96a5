//! gaze-agent CLI
//!
//! Streams gaze from an eye tracker, serves heat-maps and region checks,
//! and renders heat-maps offline from a recorded log.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use gaze_agent::{
    config::{CheckConfig, Config},
    recording::{JsonlLog, SharedRecordSink},
    replay::{run_replay, ImageConfig, ReplayOptions},
    tracker::TrackerSession,
    VERSION,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "server")]
use gaze_agent::server::{self, ServerConfig, ServerState};

#[derive(Parser)]
#[command(name = "gaze-agent")]
#[command(version = VERSION)]
#[command(about = "Eye-tracker gaze agent with heat-maps and region checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the tracker, ingest frames and serve the HTTP API
    Run {
        /// Tracker address (host:port)
        #[arg(long)]
        address: Option<String>,

        /// Seconds of gaze history to keep in memory
        #[arg(long)]
        retention: Option<u64>,

        /// HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Region check configuration file
        #[arg(long)]
        check_config: Option<PathBuf>,

        /// Record log file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Heat-map brush image
        #[arg(long)]
        brush: Option<PathBuf>,

        /// Directory served as static pages
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },

    /// Render heat-maps from a recorded log
    Replay {
        /// Record log written by `run`
        #[arg(long)]
        log_file: PathBuf,

        /// Output directory (defaults to the current time)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// JSON object mapping page URLs to background PNGs
        #[arg(long, default_value = "imageConfig.json")]
        image_config: PathBuf,

        /// Heat-map brush image
        #[arg(long)]
        brush: Option<PathBuf>,
    },

    /// Show configuration
    Config,
}

/// Requests from the console and signal handler to the main loop.
enum Control {
    Quit,
    Reload,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gaze_agent=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            address,
            retention,
            port,
            check_config,
            log_file,
            brush,
            static_dir,
        } => {
            let mut config = load_config();
            if let Some(address) = address {
                config.tracker_address = address;
            }
            if let Some(secs) = retention {
                config.retention = Duration::from_secs(secs);
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(path) = check_config {
                config.check_config_path = path;
            }
            if let Some(path) = log_file {
                config.log_path = path;
            }
            if let Some(path) = brush {
                config.brush_path = path;
            }
            if let Some(path) = static_dir {
                config.static_dir = path;
            }
            cmd_run(config)
        }
        Commands::Replay {
            log_file,
            output,
            image_config,
            brush,
        } => cmd_replay(log_file, output, image_config, brush),
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not load configuration, using defaults: {e}");
        Config::default()
    })
}

fn cmd_run(config: Config) -> anyhow::Result<()> {
    println!("gaze-agent v{VERSION}");
    println!();

    let check = CheckConfig::load(&config.check_config_path).with_context(|| {
        format!(
            "loading check config {}",
            config.check_config_path.display()
        )
    })?;
    println!(
        "Loaded {} target(s) from {}",
        check.targets.len(),
        config.check_config_path.display()
    );
    let check = Arc::new(RwLock::new(check));

    let sink: SharedRecordSink = Arc::new(
        JsonlLog::open(&config.log_path)
            .with_context(|| format!("opening record log {}", config.log_path.display()))?,
    );

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;

    let mut session = runtime
        .block_on(TrackerSession::connect(
            &config.tracker_address,
            config.retention,
        ))
        .with_context(|| format!("connecting to tracker at {}", config.tracker_address))?
        .with_sink(sink.clone());

    let status = session.status().clone();
    println!("Connected to tracker at {}", config.tracker_address);
    println!("  Screen: {}x{}", status.screen_width, status.screen_height);
    println!("  Frame rate: {} fps", status.frame_rate);
    println!(
        "  Retention: {}s ({} frames)",
        config.retention.as_secs(),
        session.buffer().capacity()
    );
    println!("  Record log: {}", config.log_path.display());

    runtime
        .block_on(session.start_ingestion())
        .context("starting ingestion")?;

    #[cfg(feature = "server")]
    let server_shutdown = {
        let state = ServerState::new(
            session.buffer().clone(),
            status.screen_width,
            status.screen_height,
            config.brush_path.clone(),
            check.clone(),
        )
        .with_sink(sink.clone())
        .with_stats(session.stats().clone());

        let (addr, shutdown) = runtime
            .block_on(server::run(ServerConfig::from_config(&config), state))
            .context("starting HTTP server")?;
        println!("  HTTP: http://{addr}");
        shutdown
    };

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let ctrlc_tx = control_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Control::Quit);
    })
    .context("setting Ctrl+C handler")?;
    spawn_console(control_tx);

    println!();
    println!("Type \"q\" and Enter (or press Ctrl+C) to stop. Enter alone reloads the check config.");
    println!();

    let mut ingestion_reported = false;
    loop {
        match control_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Control::Quit) => break,
            Ok(Control::Reload) => match CheckConfig::load(&config.check_config_path) {
                Ok(reloaded) => {
                    println!(
                        "Reloaded {} target(s) from {}",
                        reloaded.targets.len(),
                        config.check_config_path.display()
                    );
                    *check.write().unwrap_or_else(PoisonError::into_inner) = reloaded;
                }
                Err(e) => eprintln!("Error reloading check config: {e}"),
            },
            Err(RecvTimeoutError::Timeout) => {
                if !ingestion_reported && !session.is_ingesting() {
                    eprintln!("Warning: ingestion has stopped; queries keep serving the last buffered frames.");
                    ingestion_reported = true;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!("Shutting down...");

    #[cfg(feature = "server")]
    let _ = server_shutdown.send(());

    runtime.block_on(session.close());

    println!();
    println!("{}", session.stats().summary());
    Ok(())
}

/// Read console lines: "q" quits, anything else reloads.
fn spawn_console(control: crossbeam_channel::Sender<Control>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let command = if line.trim_start().starts_with('q') {
                Control::Quit
            } else {
                Control::Reload
            };
            let quit = matches!(command, Control::Quit);
            if control.send(command).is_err() || quit {
                break;
            }
        }
    });
}

fn cmd_replay(
    log_file: PathBuf,
    output: Option<PathBuf>,
    image_config: PathBuf,
    brush: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config();
    let output =
        output.unwrap_or_else(|| PathBuf::from(Utc::now().format("%Y%m%d_%H%M%S").to_string()));

    let mut options = ReplayOptions::new(log_file, output);
    options.brush_path = brush.unwrap_or(config.brush_path);
    options.image_config = ImageConfig::load(&image_config);

    println!("Replaying {}...", options.log_file.display());
    let summary = run_replay(&options)?;

    for (index, segment) in summary.segments.iter().enumerate() {
        println!(
            "  [{index}] {} ({} images)",
            segment.url,
            segment.files.len()
        );
    }
    println!(
        "Wrote {} images and {}",
        summary.image_count(),
        summary.index.display()
    );
    Ok(())
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
