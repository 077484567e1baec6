mod commands;
mod handlers;
mod server;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use handlers::AcquireLimits;

use tenure_core::config::{LockConfig, StoreConfig};

#[derive(Parser)]
#[command(
    name = "tenure",
    about = "Tenure: expiring resource leases over a shared database",
    version
)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command.
#[derive(Args)]
struct Settings {
    /// SQLite database shared by all competing clients
    #[arg(long, global = true, default_value = "tenure.db", env = "TENURE_DATABASE")]
    database: PathBuf,

    /// Lease validity in seconds
    #[arg(long, global = true, default_value_t = 30, env = "TENURE_RETENTION_SECS")]
    retention_secs: u64,

    /// Maximum pooled database connections
    #[arg(long, global = true, default_value_t = 8, env = "TENURE_POOL_SIZE")]
    pool_size: u32,

    /// Milliseconds a statement waits on a locked database
    #[arg(long, global = true, default_value_t = 5000, env = "TENURE_BUSY_TIMEOUT_MS")]
    busy_timeout_ms: u64,
}

impl Settings {
    fn lock_config(&self) -> LockConfig {
        LockConfig {
            retention_secs: self.retention_secs,
            store: StoreConfig {
                path: self.database.clone(),
                pool_size: self.pool_size,
                busy_timeout_ms: self.busy_timeout_ms,
                ..StoreConfig::default()
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP lock server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3200")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Storage backend: "sqlite" (uses --database) or "memory"
        #[arg(long, default_value = "sqlite", env = "TENURE_STORAGE")]
        storage: String,

        /// Apply schema migrations before serving
        #[arg(long)]
        migrate: bool,

        /// Most retries an HTTP caller may request
        #[arg(long, default_value_t = AcquireLimits::DEFAULT_MAX_ATTEMPTS, env = "TENURE_MAX_RETRY_ATTEMPTS")]
        max_retry_attempts: u32,

        /// Longest total retry wait an HTTP caller may request, in milliseconds
        #[arg(long, default_value_t = AcquireLimits::DEFAULT_MAX_TOTAL_WAIT_MS, env = "TENURE_MAX_RETRY_WAIT_MS")]
        max_retry_wait_ms: u64,
    },

    /// Create (or with --down, remove) the lock schema
    Migrate {
        #[arg(long)]
        down: bool,
    },

    /// Acquire a lease and print it as JSON
    Acquire {
        resource_id: String,

        /// Owner id; a random one is generated when omitted
        #[arg(long)]
        client_id: Option<String>,

        /// Fail immediately if the lock is held
        #[arg(long, conflicts_with_all = ["max_attempts", "initial_interval_ms", "multiplier"])]
        no_wait: bool,

        /// Retries after the first attempt
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Wait before the first retry, in milliseconds
        #[arg(long)]
        initial_interval_ms: Option<u64>,

        /// Growth factor applied to each subsequent wait
        #[arg(long)]
        multiplier: Option<f64>,
    },

    /// Release a lease read as JSON from stdin
    Release,

    /// Show the current lock row for a resource
    Status { resource_id: String },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.settings.lock_config();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
            migrate,
            max_retry_attempts,
            max_retry_wait_ms,
        } => {
            let limits = AcquireLimits {
                max_attempts: max_retry_attempts,
                max_total_wait: Duration::from_millis(max_retry_wait_ms),
            };
            commands::serve(&config, &host, port, &storage, migrate, limits).await
        }
        Commands::Migrate { down } => commands::migrate(config, down).await,
        Commands::Acquire {
            resource_id,
            client_id,
            no_wait,
            max_attempts,
            initial_interval_ms,
            multiplier,
        } => {
            let backoff = commands::backoff_from_args(no_wait, max_attempts, initial_interval_ms, multiplier)?;
            commands::acquire(config, resource_id, client_id, backoff).await
        }
        Commands::Release => {
            eprintln!("Reading lease from stdin...");
            let mut input = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)?;
            commands::release(config, &input).await
        }
        Commands::Status { resource_id } => commands::status(config, resource_id).await,
        Commands::Version => {
            println!("tenure {}", env!("CARGO_PKG_VERSION"));
            println!("Expiring resource leases over a shared database");
            Ok(())
        }
    }
}
