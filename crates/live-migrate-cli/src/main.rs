//! live-migrate CLI - validate and repair a table during a live migration.

mod entity;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use live_migrate::error::{with_timeout, EXIT_CANCELLED};
use live_migrate::{
    channel, drivers, Config, Direction, MigrateError, Mode, RepairConsumer, Store, Strategy,
    TableEntity, ValidationState, Validator,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use entity::Interactive;
use output::{forward_stdin, print_report, StdoutProducer};

#[derive(Parser)]
#[command(name = "live-migrate")]
#[command(about = "Validate and repair a table while it is migrated between live stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resuming incremental validation
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan both stores and print inconsistency events as JSON lines
    Validate(ScanArgs),

    /// Repair records named by JSON-line events read from stdin
    Repair,

    /// Validate and repair in one process
    Reconcile(ScanArgs),

    /// Validate a single id
    Check {
        /// Record id
        #[arg(long)]
        id: i64,

        /// Override authoritative side (SRC or DST)
        #[arg(long)]
        direction: Option<Direction>,
    },

    /// Overwrite one record from the authoritative side
    Fix {
        /// Record id
        #[arg(long)]
        id: i64,

        /// Authoritative side (SRC or DST)
        #[arg(long)]
        direction: Direction,
    },

    /// Test database connections
    HealthCheck,
}

#[derive(Args)]
struct ScanArgs {
    /// Override scan mode (full or incremental)
    #[arg(long)]
    mode: Option<Mode>,

    /// Override read strategy (row or batch)
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Override authoritative side (SRC or DST)
    #[arg(long)]
    direction: Option<Direction>,

    /// Override initial incremental watermark
    #[arg(long)]
    utime: Option<i64>,

    /// Override incremental idle sleep in milliseconds (0 stops when caught up)
    #[arg(long)]
    sleep_ms: Option<u64>,

    /// Stop scanning after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl ScanArgs {
    fn apply(&self, config: &mut Config) {
        let section = &mut config.validator;
        if let Some(mode) = self.mode {
            section.mode = mode;
        }
        if let Some(strategy) = self.strategy {
            section.strategy = strategy;
        }
        if let Some(direction) = self.direction {
            section.direction = direction;
        }
        if let Some(utime) = self.utime {
            section.utime = utime;
        }
        if let Some(ms) = self.sleep_ms {
            section.sleep_interval_ms = ms;
        }
    }

    /// Cancel `cancel` once the deadline passes.
    fn arm_deadline(&self, cancel: &CancellationToken) {
        if let Some(secs) = self.deadline_secs {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                info!(secs, "Deadline reached, stopping scan");
                cancel.cancel();
            });
        }
    }
}

/// Connected stores, with `src` always the configured base.
struct Stores {
    src: Arc<dyn Store>,
    dst: Arc<dyn Store>,
}

impl Stores {
    async fn connect(config: &Config) -> Result<Self, MigrateError> {
        Ok(Self {
            src: drivers::connect(&config.base).await?,
            dst: drivers::connect(&config.target).await?,
        })
    }

    /// `(base, target)` as seen by a validator trusting `direction`.
    fn oriented(&self, direction: Direction) -> (Arc<dyn Store>, Arc<dyn Store>) {
        match direction {
            Direction::Src => (self.src.clone(), self.dst.clone()),
            Direction::Dst => (self.dst.clone(), self.src.clone()),
        }
    }

    fn repair_consumer(&self, config: &Config) -> RepairConsumer<Interactive> {
        RepairConsumer::new(self.src.clone(), self.dst.clone())
            .with_call_timeout(config.repair.call_timeout())
    }

    async fn close(&self) {
        self.src.close().await;
        self.dst.close().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel = setup_signal_handler(cli.shutdown_timeout)?;

    match cli.command {
        Commands::Validate(ref args) => {
            args.apply(&mut config);
            config.validate()?;
            let stores = Stores::connect(&config).await?;
            args.arm_deadline(&cancel);

            let stats = validate(&cli, &config, &stores, &cancel).await;
            stores.close().await;
            let stats = stats?;
            print_report(&mut std::io::stderr(), cli.output_json, Some(&stats), None)?;
        }

        Commands::Repair => {
            let stores = Stores::connect(&config).await?;
            let repair = stores.repair_consumer(&config);
            let (producer, consumer) = channel(config.repair.channel_capacity);
            let consumer = consumer.with_retry(config.repair.retry_policy());

            let (forwarded, stats) = tokio::join!(
                forward_stdin(producer, &cancel),
                consumer.run(&repair, &cancel),
            );
            stores.close().await;
            forwarded?;
            print_report(&mut std::io::stdout(), cli.output_json, None, Some(&stats))?;
        }

        Commands::Reconcile(ref args) => {
            args.apply(&mut config);
            config.validate()?;
            let stores = Stores::connect(&config).await?;
            args.arm_deadline(&cancel);

            let (base, target) = stores.oriented(config.validator.direction);
            let (producer, consumer) = channel(config.repair.channel_capacity);
            let validator = Validator::<Interactive>::new(
                base,
                target,
                Arc::new(producer),
                config.validator.to_validator_config(),
            );
            let repair = stores.repair_consumer(&config);
            let consumer = consumer.with_retry(config.repair.retry_policy());

            // The consumer drains until the validator (the last producer) is dropped.
            let scan = {
                let cancel = cancel.clone();
                async move { validator.validate(&cancel).await }
            };
            let (validated, repaired) = tokio::join!(scan, consumer.run(&repair, &cancel));
            stores.close().await;
            let validated = validated?;
            print_report(
                &mut std::io::stdout(),
                cli.output_json,
                Some(&validated),
                Some(&repaired),
            )?;
        }

        Commands::Check { id, direction } => {
            if let Some(direction) = direction {
                config.validator.direction = direction;
            }
            let stores = Stores::connect(&config).await?;
            let (base, target) = stores.oriented(config.validator.direction);
            let validator = Validator::<Interactive>::new(
                base,
                target,
                Arc::new(StdoutProducer::new()),
                config.validator.to_validator_config(),
            );
            let kind = validator.validate_id(id).await;
            stores.close().await;
            if kind?.is_none() && !cli.output_json {
                eprintln!("Record {id} is consistent");
            }
        }

        Commands::Fix { id, direction } => {
            let stores = Stores::connect(&config).await?;
            let repair = stores.repair_consumer(&config);
            let outcome = with_timeout(
                "fix",
                config.repair.call_timeout(),
                repair.fixer(direction).fix(id),
            )
            .await;
            stores.close().await;
            let outcome = outcome?;

            if cli.output_json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else {
                println!("Record {id} ({direction} authoritative): {outcome:?}");
            }
        }

        Commands::HealthCheck => {
            let base = check_store("Base", &config.base).await;
            let target = check_store("Target", &config.target).await;
            let healthy = base.connected && target.connected;

            if cli.output_json {
                let result = serde_json::json!({
                    "base": base,
                    "target": target,
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for store in [&base, &target] {
                    println!(
                        "  {}: {} ({}ms)",
                        store.name,
                        if store.connected { "OK" } else { "FAILED" },
                        store.latency_ms
                    );
                    if let Some(ref err) = store.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Run one validation pass, resuming and saving the watermark when a state
/// file is configured.
async fn validate(
    cli: &Cli,
    config: &Config,
    stores: &Stores,
    cancel: &CancellationToken,
) -> Result<live_migrate::ValidateStats, MigrateError> {
    let (base, target) = stores.oriented(config.validator.direction);
    let mut validator_config = config.validator.to_validator_config();

    let state = match cli.state_file {
        Some(ref path) => {
            let state = ValidationState::resume_or_new(
                path,
                &config.hash(Interactive::TABLE),
                Interactive::TABLE,
                validator_config.start,
            )?;
            validator_config = validator_config.with_start(state.watermark);
            Some((path.clone(), state))
        }
        None => None,
    };

    let producer = Arc::new(StdoutProducer::new());
    let validator = Validator::<Interactive>::new(base, target, producer, validator_config);
    let tracker = state.map(|(path, state)| {
        let follow = state.follow(path.clone(), validator.watermark(), Duration::from_secs(1));
        (path, tokio::spawn(follow))
    });

    let result = validator.validate(cancel).await;
    drop(validator);

    if let Some((path, handle)) = tracker {
        let mut state = handle
            .await
            .map_err(|e| MigrateError::Task(e.to_string()))?;
        match result {
            Ok(stats) if cancel.is_cancelled() => state.mark_cancelled(stats),
            Ok(stats) => state.mark_completed(stats),
            Err(ref e) => state.mark_failed(&e.to_string()),
        }
        state.save(&path)?;
        info!(run_id = %state.run_id, watermark = ?state.watermark, "Saved validation state");
    }
    result
}

#[derive(serde::Serialize)]
struct StoreHealth {
    name: &'static str,
    connected: bool,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn check_store(name: &'static str, config: &live_migrate::StoreConfig) -> StoreHealth {
    let start = Instant::now();
    let res = match drivers::connect(config).await {
        Ok(store) => {
            let res = store.ping().await;
            store.close().await;
            res
        }
        Err(e) => Err(e),
    };
    StoreHealth {
        name,
        connected: res.is_ok(),
        latency_ms: start.elapsed().as_millis() as u64,
        error: res.err().map(|e| e.to_string()),
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Stdout carries events and reports.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Exit anyway if the commands have not wound down `timeout` seconds after
/// the shutdown signal.
fn enforce_shutdown_timeout(cancel: &CancellationToken, timeout: u64) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        tokio::time::sleep(Duration::from_secs(timeout)).await;
        warn!(timeout, "Graceful shutdown timed out, exiting");
        std::process::exit(i32::from(EXIT_CANCELLED));
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
    });
    enforce_shutdown_timeout(&cancel_token, shutdown_timeout);

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });
    enforce_shutdown_timeout(&cancel_token, shutdown_timeout);

    Ok(cancel_token)
}
