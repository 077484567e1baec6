use std::sync::Arc;

use anyhow::{bail, Context};

use tenure_core::cancel::CancellationToken;
use tenure_core::config::LockConfig;
use tenure_core::infrastructure_in_memory::InMemoryLockStore;
use tenure_core::{BackoffConfig, ClientId, ExponentialBackoff, Lease, Lock, LockCoordinator, ResourceId};

use crate::handlers::{AcquireLimits, LockInfo, ReleaseResponse};
use crate::server::{self, SharedLock};

// ─── Storage Backend Selection ──────────────────────────────────────────────

#[cfg(feature = "sqlite")]
fn open_lock(config: &LockConfig, cancel: CancellationToken, migrate: bool) -> anyhow::Result<SharedLock> {
    use tenure_core::infrastructure_sqlite::{migrate_up, SqliteLockStore};

    let store = SqliteLockStore::connect(&config.store)
        .with_context(|| format!("Failed to open lock store at '{}'", config.store.path.display()))?;
    if migrate {
        let outcome = migrate_up(&store).context("Failed to migrate lock schema")?;
        tracing::info!(?outcome, "Schema migration finished");
    }
    let lock = LockCoordinator::from_config(store, config)?.with_cancellation(cancel);
    Ok(Arc::new(lock))
}

#[cfg(not(feature = "sqlite"))]
fn open_lock(_config: &LockConfig, _cancel: CancellationToken, _migrate: bool) -> anyhow::Result<SharedLock> {
    bail!("SQLite storage requested but the `sqlite` feature is not enabled. Rebuild with: cargo build --features sqlite")
}

fn create_lock(
    config: &LockConfig,
    storage: &str,
    cancel: CancellationToken,
    migrate: bool,
) -> anyhow::Result<SharedLock> {
    match storage {
        "memory" => {
            tracing::info!("Storage backend: in-memory (locks are local to this process)");
            let lock = LockCoordinator::from_config(InMemoryLockStore::new(), config)?
                .with_cancellation(cancel);
            Ok(Arc::new(lock))
        }
        "sqlite" => {
            tracing::info!("Storage backend: SQLite ({})", config.store.path.display());
            open_lock(config, cancel, migrate)
        }
        other => bail!("Unknown storage backend: '{}'. Use 'sqlite' or 'memory'", other),
    }
}

/// Cancels `cancel` on Ctrl-C so a waiting acquisition gives up promptly.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
}

async fn run_blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("Lock task panicked")?
}

pub fn backoff_from_args(
    no_wait: bool,
    max_attempts: Option<u32>,
    initial_interval_ms: Option<u64>,
    multiplier: Option<f64>,
) -> anyhow::Result<ExponentialBackoff> {
    if no_wait {
        return Ok(ExponentialBackoff::no_retry());
    }
    let defaults = BackoffConfig::default();
    let config = BackoffConfig {
        max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
        initial_interval_ms: initial_interval_ms.unwrap_or(defaults.initial_interval_ms),
        multiplier: multiplier.unwrap_or(defaults.multiplier),
    };
    ExponentialBackoff::try_from(&config).context("Invalid backoff")
}

// ─── Commands ───────────────────────────────────────────────────────────────

pub async fn serve(
    config: &LockConfig,
    host: &str,
    port: u16,
    storage: &str,
    migrate: bool,
    limits: AcquireLimits,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let lock = {
        let config = config.clone();
        let storage = storage.to_string();
        let cancel = cancel.clone();
        run_blocking(move || create_lock(&config, &storage, cancel, migrate)).await?
    };
    server::run(host, port, lock, limits, cancel).await
}

#[cfg(feature = "sqlite")]
pub async fn migrate(config: LockConfig, down: bool) -> anyhow::Result<()> {
    use tenure_core::infrastructure_sqlite::{migrate_down, migrate_up, SqliteLockStore};

    let outcome = run_blocking(move || {
        let store = SqliteLockStore::connect(&config.store)
            .with_context(|| format!("Failed to open lock store at '{}'", config.store.path.display()))?;
        let outcome = if down { migrate_down(&store)? } else { migrate_up(&store)? };
        Ok(outcome)
    })
    .await?;
    println!("{:?}", outcome);
    Ok(())
}

#[cfg(not(feature = "sqlite"))]
pub async fn migrate(_config: LockConfig, _down: bool) -> anyhow::Result<()> {
    bail!("Migrations need the `sqlite` feature. Rebuild with: cargo build --features sqlite")
}

pub async fn acquire(
    config: LockConfig,
    resource_id: String,
    client_id: Option<String>,
    mut backoff: ExponentialBackoff,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let resource_id = ResourceId::new(resource_id);
    let client_id = client_id.map(ClientId::new).unwrap_or_else(ClientId::generate);

    let lease = run_blocking(move || {
        let lock = open_lock(&config, cancel, false)?;
        Ok(lock.acquire_with_backoff(&resource_id, &client_id, &mut backoff)?)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&lease)?);
    Ok(())
}

pub async fn release(config: LockConfig, input: &str) -> anyhow::Result<()> {
    let lease: Lease = serde_json::from_str(input).context("Invalid lease JSON")?;

    let outcome = run_blocking(move || {
        let lock = open_lock(&config, CancellationToken::new(), false)?;
        Ok(lock.release(&lease)?)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&ReleaseResponse::from(outcome))?);
    Ok(())
}

pub async fn status(config: LockConfig, resource_id: String) -> anyhow::Result<()> {
    let resource_id = ResourceId::new(resource_id);
    let lookup = resource_id.clone();

    let row = run_blocking(move || {
        let lock = open_lock(&config, CancellationToken::new(), false)?;
        Ok(lock.inspect(&lookup)?)
    })
    .await?;

    match row {
        Some(row) => {
            let info = LockInfo::from_row(&row, chrono::Utc::now());
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        None => eprintln!("No lock held on '{}'", resource_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tenure_core::Backoff;

    #[test]
    fn test_backoff_from_args() {
        let backoff = backoff_from_args(true, None, None, None).unwrap();
        assert_eq!(backoff.max_attempts(), 0);

        let backoff = backoff_from_args(false, None, None, None).unwrap();
        assert_eq!(backoff, ExponentialBackoff::default());

        let mut backoff = backoff_from_args(false, Some(2), Some(500), Some(2.0)).unwrap();
        backoff.start();
        assert_eq!(backoff.next(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next(), None);

        assert!(backoff_from_args(false, None, Some(0), None).is_err());
    }

    #[test]
    fn test_unknown_storage_rejected() {
        let err = create_lock(&LockConfig::default(), "redis", CancellationToken::new(), false)
            .err()
            .expect("unknown backend must fail");
        assert!(err.to_string().contains("Unknown storage backend"));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LockConfig::default();
        config.store.path = dir.path().join("cli.db");

        let lock = create_lock(&config, "sqlite", CancellationToken::new(), true).unwrap();
        let res = ResourceId::new("jobs/nightly");
        let lease = lock.acquire_no_wait(&res, &ClientId::new("cli")).unwrap();
        assert!(lock.acquire_no_wait(&res, &ClientId::new("other")).is_err());
        assert_eq!(lock.release(&lease).unwrap(), tenure_core::ReleaseOutcome::Released);
    }
}
