//! tilecast-sim: entry point.
//!
//! ```text
//! tilecast-sim                     Run with tilecast-sim.toml or defaults
//! tilecast-sim --config <path>     Load a custom config TOML
//! tilecast-sim --gen-config        Write default config to stdout
//! tilecast-sim --duration 10       Override the run length in seconds
//! tilecast-sim --fps 30            Override the camera rate
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tilecast_sim::config::SimConfig;
use tilecast_sim::sim::Simulation;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-sim", about = "Headless tilecast media pipeline simulator")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast-sim.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Run length in seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Camera frames per second.
    #[arg(long)]
    fps: Option<u32>,

    /// Number of remote participants.
    #[arg(long)]
    participants: Option<u32>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&SimConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SimConfig::load(&cli.config);
    if let Some(duration) = cli.duration {
        config.sim.duration_secs = duration;
    }
    if let Some(fps) = cli.fps {
        config.sim.fps = fps;
    }
    if let Some(participants) = cli.participants {
        config.sim.remote_participants = participants;
    }

    // Stdout carries the event stream, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("tilecast-sim v{}", env!("CARGO_PKG_VERSION"));
    info!("duration: {}s at {} fps", config.sim.duration_secs, config.sim.fps);
    info!("remote participants: {}", config.sim.remote_participants);
    info!("screen share: {}", config.sim.screen_share);

    let sim = Simulation::new(config);
    let stop = sim.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    let report = tokio::task::spawn_blocking(move || sim.run(Box::new(std::io::stdout()))).await??;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
