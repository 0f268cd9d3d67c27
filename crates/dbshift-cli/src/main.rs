//! dbshift CLI - schema and data migration between relational databases.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use dbshift::{
    Config, Connection, ConnectionConfig, ConvertError, DriverRegistry, EtlStep, FanoutNotifier,
    MigrationService, MigrationStatus, MigrationWorkspace, SqlKind, TracingNotifier,
};
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use uuid::Uuid;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbshift")]
#[command(about = "Schema and data migration between relational databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, transform, load and validate a migration
    Run {
        /// Migration name [default: origin -> target]
        #[arg(long)]
        name: Option<String>,

        /// Override the target dialect
        #[arg(long)]
        dialect: Option<String>,

        /// Override number of dump workers
        #[arg(long)]
        workers: Option<usize>,

        /// Load without asking for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Review or edit generated DDL
    Ddl {
        #[command(subcommand)]
        action: DdlAction,
    },

    /// Test database connections
    HealthCheck,
}

#[derive(Subcommand)]
enum DdlAction {
    /// List one page of DDL artifacts
    List {
        /// Migration id
        #[arg(long)]
        migration: Uuid,

        /// Zero-based page index
        #[arg(long, default_value = "0")]
        page: usize,

        /// Artifacts per page
        #[arg(long, default_value = "5")]
        size: usize,
    },

    /// Replace a DDL artifact with the content of a file
    Update {
        /// Migration id
        #[arg(long)]
        migration: Uuid,

        /// Artifact file name, e.g. sales.orders.sql
        #[arg(long)]
        file: String,

        /// Path of the replacement DDL
        #[arg(long)]
        from: PathBuf,
    },
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

async fn run() -> Result<(), ConvertError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(ConvertError::Config)?;

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            name,
            dialect,
            workers,
            yes,
        } => {
            if let Some(d) = dialect {
                config.target_dialect = Some(d);
            }
            if let Some(w) = workers {
                config.extraction.workers = Some(w);
            }
            config.validate()?;

            let cancel_token = setup_signal_handler().await?;
            let status = run_migration(&config, name, yes, cancel_token).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&status.snapshot())?);
            } else {
                print_status(&status, &MigrationWorkspace::new(&config.data_dir, status.id));
            }
        }

        Commands::Ddl { action } => match action {
            DdlAction::List {
                migration,
                page,
                size,
            } => {
                let ws = existing_workspace(&config.data_dir, migration)?;
                let listing = ws.list_ddl(page, size)?;

                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                } else {
                    println!(
                        "DDL for migration {} (page {}, {} of {} files):",
                        migration,
                        listing.page,
                        listing.files.len(),
                        listing.total
                    );
                    for file in &listing.files {
                        println!("\n-- {}\n{}", file.filename, file.content.trim_end());
                    }
                }
            }

            DdlAction::Update {
                migration,
                file,
                from,
            } => {
                let ws = existing_workspace(&config.data_dir, migration)?;
                let content = std::fs::read_to_string(&from)?;
                ws.update_ddl(&file, &content)?;
                println!("Updated {}", ws.sql_dir(SqlKind::Ddl).join(&file).display());
            }
        },

        Commands::HealthCheck => {
            let origin = required(config.origin.as_ref(), "origin")?;
            let target = required(config.target.as_ref(), "target")?;
            let registry = DriverRegistry::with_builtins();

            let origin_check = check_connection(&registry, origin).await;
            let target_check = check_connection(&registry, target).await;
            let healthy = origin_check.error.is_none() && target_check.error.is_none();

            if cli.output_json {
                let result = serde_json::json!({
                    "origin": origin_check.to_json(),
                    "target": target_check.to_json(),
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                origin_check.print("Origin");
                target_check.print("Target");
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            for check in [origin_check, target_check] {
                if let Some(err) = check.error {
                    return Err(ConvertError::connection(check.endpoint, err));
                }
            }
        }
    }

    Ok(())
}

/// Drive one migration through every stage, waiting for each to settle.
async fn run_migration(
    config: &Config,
    name: Option<String>,
    yes: bool,
    cancel: CancellationToken,
) -> Result<Arc<MigrationStatus>, ConvertError> {
    let origin = required(config.origin.as_ref(), "origin")?.clone();
    let target = required(config.target.as_ref(), "target")?.clone();
    let dialect = required(config.target_dialect.as_ref(), "target_dialect")?.clone();

    let notifier = FanoutNotifier::new().with(Arc::new(TracingNotifier));
    let service = MigrationService::new(config).with_notifier(Arc::new(notifier));

    let name = name.unwrap_or_else(|| format!("{} -> {}", origin.name, target.name));
    let id = service.create(&name).id;
    let ws = service.workspace(id);
    info!("Migration {} artifacts: {}", id, ws.root().display());

    service.start_extraction(id, origin)?;
    settle(&service, id, "extraction", &cancel).await?;

    service.start_transformation(id, &dialect)?;
    let status = settle(&service, id, "transformation", &cancel).await?;

    if !yes && !confirm_load(&ws, &target)? {
        println!(
            "Load skipped. Generated SQL is kept in {}",
            ws.root().display()
        );
        return Ok(status);
    }

    // Validation follows the load in the same background task.
    service.start_load(id, target)?;
    let status = settle(&service, id, "load", &cancel).await?;

    service.shutdown().await;
    Ok(status)
}

/// Wait for the running stage and fail if it ended in ERROR.
async fn settle(
    service: &MigrationService,
    id: Uuid,
    stage: &'static str,
    cancel: &CancellationToken,
) -> Result<Arc<MigrationStatus>, ConvertError> {
    tokio::select! {
        _ = service.wait_idle() => {}
        _ = cancel.cancelled() => {
            return Err(ConvertError::StageFailed {
                stage,
                message: "interrupted by signal".into(),
            });
        }
    }

    let status = service.status(id)?;
    if status.step == EtlStep::Error {
        return Err(ConvertError::StageFailed {
            stage,
            message: status.message.clone().unwrap_or_default(),
        });
    }
    Ok(status)
}

fn confirm_load(ws: &MigrationWorkspace, target: &ConnectionConfig) -> Result<bool, ConvertError> {
    println!(
        "\nGenerated DDL is in {}. Review or edit it before loading.",
        ws.sql_dir(SqlKind::Ddl).display()
    );
    Confirm::new()
        .with_prompt(format!("Load into {}?", target.endpoint()))
        .default(false)
        .interact()
        .map_err(|e| {
            ConvertError::Config(format!(
                "cannot prompt for load confirmation ({}); pass --yes to load without asking",
                e
            ))
        })
}

fn print_status(status: &MigrationStatus, ws: &MigrationWorkspace) {
    println!("\nMigration {}", status.step);
    println!("  ID: {}", status.id);
    println!("  Name: {}", status.name);
    println!("  Artifacts: {}", ws.root().display());
    if let Some(finished) = status.finished_at {
        let elapsed = finished - status.started_at;
        println!(
            "  Duration: {:.2}s",
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    if !status.metadata.execution_order.is_empty() {
        println!("  Tables: {}", status.metadata.execution_order.join(", "));
    }
    if let Some(message) = &status.message {
        for line in message.lines() {
            println!("  {}", line);
        }
    }
}

fn required<'a, T>(value: Option<&'a T>, field: &str) -> Result<&'a T, ConvertError> {
    value.ok_or_else(|| ConvertError::Config(format!("{} is required for this command", field)))
}

fn existing_workspace(data_dir: &Path, id: Uuid) -> Result<MigrationWorkspace, ConvertError> {
    let ws = MigrationWorkspace::new(data_dir, id);
    if !ws.root().is_dir() {
        return Err(ConvertError::UnknownMigration(id));
    }
    Ok(ws)
}

struct ConnectionCheck {
    endpoint: String,
    latency_ms: u128,
    error: Option<String>,
}

impl ConnectionCheck {
    fn print(&self, label: &str) {
        println!(
            "  {} ({}): {} ({}ms)",
            label,
            self.endpoint,
            if self.error.is_none() { "OK" } else { "FAILED" },
            self.latency_ms
        );
        if let Some(ref err) = self.error {
            println!("    Error: {}", err);
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "endpoint": self.endpoint,
            "connected": self.error.is_none(),
            "latency_ms": self.latency_ms,
            "error": self.error,
        })
    }
}

async fn check_connection(registry: &DriverRegistry, config: &ConnectionConfig) -> ConnectionCheck {
    let start = Instant::now();
    let outcome = match registry.connect(config).await {
        Ok(mut conn) => {
            let checked = conn.catalog().await.map(|_| ());
            let closed = conn.close().await;
            checked.and(closed)
        }
        Err(e) => Err(e),
    };
    ConnectionCheck {
        endpoint: config.endpoint(),
        latency_ms: start.elapsed().as_millis(),
        error: outcome.err().map(|e| e.to_string()),
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
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

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, ConvertError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Stopping..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Stopping..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, ConvertError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
