//! sqlbeatd - periodic SQL metrics collector daemon.
//!
//! Polls every configured database on a fixed period, runs the metric
//! catalog against each one and writes one JSON event per result row.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use sqlbeat::config::{Config, ConfigError};
use sqlbeat::driver::PostgresDriver;
use sqlbeat::scheduler::{OverlapPolicy, Scheduler};
use sqlbeat::sink::SinkConfig;
use sqlbeat::target::{Target, TargetSpec};
use sqlbeat::util::{format_duration, parse_duration};

/// Periodic SQL metrics collector daemon.
#[derive(Parser)]
#[command(name = "sqlbeatd", about = "Periodic SQL metrics collector", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "SQLBEAT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Collection period (e.g., "10s", "1m", "30"). Minimum is 1s.
    #[arg(short, long, env = "SQLBEAT_PERIOD", value_parser = parse_duration)]
    period: Option<Duration>,

    /// Target connection descriptor. Repeat for several targets.
    /// Replaces the targets of the configuration file.
    #[arg(short, long = "target", value_name = "DSN")]
    targets: Vec<String>,

    /// What to do when a target is still busy with the previous tick (allow, skip).
    #[arg(long, env = "SQLBEAT_OVERLAP")]
    overlap: Option<OverlapPolicy>,

    /// How long to wait for in-flight collections on shutdown.
    #[arg(long, value_parser = parse_duration)]
    drain_timeout: Option<Duration>,

    /// Where to publish events.
    #[arg(long, value_enum)]
    sink: Option<SinkKind>,

    /// Output file for the file sink. Implies --sink file.
    #[arg(short, long, env = "SQLBEAT_OUTPUT", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Run a single collection and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkKind {
    Stdout,
    File,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so they never mix with events on stdout.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for crate_name in ["sqlbeatd", "sqlbeat"] {
        if let Ok(directive) = format!("{}={}", crate_name, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration file, if any, and applies command-line overrides.
fn load_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(period) = args.period {
        config.period = period;
    }
    if !args.targets.is_empty() {
        config.targets = args
            .targets
            .iter()
            .cloned()
            .map(TargetSpec::Descriptor)
            .collect();
    }
    if let Some(overlap) = args.overlap {
        config.overlap = overlap;
    }
    if let Some(timeout) = args.drain_timeout {
        config.drain_timeout = timeout;
    }

    match (args.sink, &args.output) {
        (Some(SinkKind::Stdout), Some(_)) => {
            return Err(ConfigError::Invalid(
                "--output cannot be used with --sink stdout".to_string(),
            ));
        }
        (Some(SinkKind::Stdout), None) => config.sink = SinkConfig::Stdout,
        (_, Some(path)) => config.sink = SinkConfig::File { path: path.clone() },
        (Some(SinkKind::File), None) => {
            if !matches!(config.sink, SinkConfig::File { .. }) {
                return Err(ConfigError::Invalid("--sink file requires --output".to_string()));
            }
        }
        (None, None) => {}
    }

    Ok(config)
}

fn describe_targets(targets: &[Target]) -> String {
    targets
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("sqlbeatd {} starting", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    let resolved = config
        .resolve_targets()
        .and_then(|targets| config.catalog().map(|catalog| (targets, catalog)));
    let (targets, catalog) = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    let period = config.effective_period();
    info!(
        "Config: period={}, overlap={}, drain_timeout={}, connect_timeout={}",
        format_duration(period),
        config.overlap,
        format_duration(config.drain_timeout),
        format_duration(config.connect_timeout)
    );
    info!("Targets ({}): {}", targets.len(), describe_targets(&targets));
    info!(
        "Metrics ({}): {}",
        catalog.len(),
        catalog.names().collect::<Vec<_>>().join(", ")
    );

    let sink = match config.sink.connect() {
        Ok(sink) => sink,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };
    match &config.sink {
        SinkConfig::Stdout => info!("Sink: stdout"),
        SinkConfig::File { path } => info!("Sink: file {}", path.display()),
    }

    let driver = PostgresDriver::new().with_connect_timeout(config.connect_timeout);
    let scheduler = Scheduler::new(targets, Arc::new(catalog), Arc::new(driver), Arc::clone(&sink))
        .with_period(period)
        .with_overlap(config.overlap)
        .with_drain_timeout(config.drain_timeout);

    if args.once {
        let reports = scheduler.collect_once();
        let published: usize = reports.iter().map(|r| r.published).sum();
        let errors: usize = reports.iter().map(|r| r.errors.len()).sum();
        info!(
            "Single collection done: {} targets, {} events, {} errors",
            reports.len(),
            published,
            errors
        );
        sink.close();
        return ExitCode::SUCCESS;
    }

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let summary = scheduler.run(&running);

    sink.close();
    info!(
        "sqlbeatd stopped after {} ticks ({} workers started, {} skipped, {} abandoned)",
        summary.ticks, summary.workers_started, summary.workers_skipped, summary.workers_abandoned
    );
    ExitCode::SUCCESS
}
