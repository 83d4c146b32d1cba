use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

use lapsecam::{clock_gate, CameraSession, LapsecamConfig, MockCamera, TimelapseScheduler};

#[derive(Parser, Debug)]
#[command(name = "lapsecam")]
#[command(about = "Rust-based tethered camera controller for unattended time-lapse photography")]
#[command(version)]
#[command(long_about = "Drives a tethered camera through unattended, schedule-driven \
photography: periodic time-lapse capture and bracketed exposure sweeps across \
aperture and shutter-speed combinations, with automatic session recovery when \
the device faults.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lapsecam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting a run")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start the schedule
    #[arg(long, help = "Perform dry run - initialize components but don't start capturing")]
    dry_run: bool,

    /// Recover files stranded on the device, then exit
    #[arg(long, help = "Download and clear files left in the device folder, then exit")]
    drain: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config();
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    info!("Starting lapsecam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    // Load and validate configuration
    let config = match LapsecamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;

    // The wire-level camera transport is deployment-specific; a mock body
    // stands in until one is wired up.
    warn!("No camera transport configured, using mock device");
    let mut session = CameraSession::acquire(Box::new(MockCamera::new()));

    if args.drain {
        let target = PathBuf::from(&config.output.root).join("drain");
        let recovered = session
            .drain_to(&config.device.storage_folder, &target)
            .await?;
        println!("✓ Recovered {} file(s) to {}", recovered, target.display());
        session.release();
        return Ok(());
    }

    let gate = clock_gate(
        config.system.gate,
        config.system.dusk_hour,
        config.system.dawn_hour,
    );
    let mut scheduler = TimelapseScheduler::new(config, session, gate);

    if args.dry_run {
        info!("Dry run mode - components initialized but schedule not started");
        println!("✓ Dry run completed successfully");
        return Ok(());
    }

    // Runs until the process is shut down externally
    scheduler.run().await.map_err(|e| {
        error!("Capture run failed: {}", e);
        e
    })?;

    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    // Create environment filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lapsecam={}", log_level)));

    // Configure format based on options
    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Lapsecam Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[device]
# Dot-path of the aperture setting in the device configuration tree
aperture_path = "main.capturesettings.aperture"
# Dot-path of the shutter speed setting in the device configuration tree
shutter_path = "main.capturesettings.shutterspeed"
# Device-side folder that captures land in
storage_folder = "/DCIM/100CANON"

[schedule]
# Capture mode: "sweep" (full exposure matrix) or "single" (one shot per interval)
mode = "sweep"
# Seconds between sweeps or between shots
interval_seconds = 3600.0
# Polling period for the trigger loop in single mode
poll_seconds = 1.0
# Lookahead used to forecast an upcoming shot
pretrigger_seconds = 2.0
# Capture attempts per due shot before the fault is surfaced
max_attempts = 5

[sweep]
# Largest f-number included in a sweep
aperture_max = 5.6
# Fastest shutter speed included in a sweep, in seconds
shutter_min = 0.008
# Slowest shutter speed included in a sweep, in seconds
shutter_max = 0.334
# Seconds to let the device settle between a capture and its cleanup
settle_seconds = 20.0

[output]
# Base path for storing captures
root = "./captures"
# Write a manifest JSON file for each sweep run
save_manifest = true

[system]
# Seconds to wait before re-checking an inactive day/night gate
gate_backoff_seconds = 10.0
# Keep running after a shot exhausts its retry budget
continue_after_failure = false
# Day/night gate: "always" or "hours" (active dusk_hour..dawn_hour)
gate = "hours"
# Hour of day (0-23) after which the gate opens
dusk_hour = 20
# Hour of day (0-23) before which the gate stays open
dawn_hour = 6
"#;

    println!("{}", default_config);
}
