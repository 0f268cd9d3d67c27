//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of logical CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = cpu_cores();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one sub-directory of artifacts per migration.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory with `<dialect>.json` conversion maps. Built-in maps are
    /// used for dialects without a file here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_maps_dir: Option<PathBuf>,

    /// Table dump behavior.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Origin database, for front ends that run a whole migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ConnectionConfig>,

    /// Target database, for front ends that run a whole migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ConnectionConfig>,

    /// Conversion map used by the transformation stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dialect: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            conversion_maps_dir: None,
            extraction: ExtractionConfig::default(),
            origin: None,
            target: None,
            target_dialect: None,
        }
    }
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.extraction = self.extraction.with_auto_tuning(&resources);
        self
    }
}

/// Logical CPU cores, detected once per process.
pub fn cpu_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        let sys = System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
        sys.cpus().len().max(1)
    })
}

/// Worker pool size when none is configured: twice the CPU cores.
pub fn default_workers() -> usize {
    (cpu_cores() * 2).max(1)
}

/// Table dump configuration.
/// `None` means "not set": the auto-tuned or fallback default applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Worker pool size. Auto-tuned to twice the CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Maximum origin connections open at once. Defaults to the pool size
    /// and never exceeds it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_batch: Option<usize>,

    /// Hard limit for the whole dump, in seconds (default: 1800).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: None,
            connection_batch: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ExtractionConfig {
    /// Fill unset values from system resources.
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.workers.is_none() {
            self.workers = Some((resources.cpu_cores * 2).max(1));
        }

        info!(
            "Auto-tuned extraction: workers={}, connection_batch={}",
            self.get_workers(),
            self.get_connection_batch()
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers).max(1)
    }

    pub fn get_connection_batch(&self) -> usize {
        let workers = self.get_workers();
        self.connection_batch.unwrap_or(workers).clamp(1, workers)
    }
}

/// Connection settings for an origin or target database.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Logical name; also names the extracted database definition.
    pub name: String,

    /// Engine identifier: postgres, mssql, mysql or memory.
    pub engine: String,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default depends on the engine).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema to read from or write to (default depends on the engine).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// PostgreSQL and MySQL SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// SQL Server: encrypt the connection (default: false).
    #[serde(default)]
    pub encrypt: bool,

    /// SQL Server: trust the server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl ConnectionConfig {
    /// Minimal configuration for an engine and database.
    pub fn new(
        name: impl Into<String>,
        engine: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            engine: engine.into(),
            host: String::new(),
            port: None,
            database: database.into(),
            user: String::new(),
            password: String::new(),
            schema: None,
            ssl_mode: default_ssl_mode(),
            encrypt: false,
            trust_server_cert: false,
        }
    }

    /// Printable location without credentials, for logs and error messages.
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}/{}", self.engine, self.host, port, self.database),
            None => format!("{}://{}/{}", self.engine, self.host, self.database),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

// Default value functions for serde
fn default_data_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}
