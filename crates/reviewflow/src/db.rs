//! Postgres pool construction and migrations.

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Pool tuning read from `REVIEWFLOW_DB_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Issue `SET jit = OFF` on each new connection.
    pub disable_jit: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(10),
            disable_jit: true,
        }
    }
}

impl PoolSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_connections = lookup("REVIEWFLOW_DB_MAX_CONNECTIONS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .map(|n| n.clamp(1, 32))
            .unwrap_or(defaults.max_connections);

        let acquire_timeout = lookup("REVIEWFLOW_DB_ACQUIRE_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|s| Duration::from_secs(s.clamp(1, 60)))
            .unwrap_or(defaults.acquire_timeout);

        let disable_jit = lookup("REVIEWFLOW_DISABLE_JIT")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(defaults.disable_jit);

        Self {
            max_connections,
            acquire_timeout,
            disable_jit,
        }
    }
}

pub async fn connect(database_url: &str, settings: PoolSettings) -> anyhow::Result<PgPool> {
    let disable_jit = settings.disable_jit;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if disable_jit {
                    sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .context("connecting to postgres")?;

    tracing::debug!(
        max_connections = settings.max_connections,
        acquire_timeout_secs = settings.acquire_timeout.as_secs(),
        disable_jit,
        "database pool ready"
    );

    Ok(pool)
}

/// [`connect`] with settings from the environment.
pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    connect(database_url, PoolSettings::from_env()).await
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("running migrations")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        assert_eq!(PoolSettings::from_lookup(|_| None), PoolSettings::default());
    }

    #[test]
    fn values_are_clamped() {
        let s = PoolSettings::from_lookup(|k| match k {
            "REVIEWFLOW_DB_MAX_CONNECTIONS" => Some("500".to_string()),
            "REVIEWFLOW_DB_ACQUIRE_TIMEOUT_SECS" => Some("0".to_string()),
            "REVIEWFLOW_DISABLE_JIT" => Some("false".to_string()),
            _ => None,
        });
        assert_eq!(s.max_connections, 32);
        assert_eq!(s.acquire_timeout, Duration::from_secs(1));
        assert!(!s.disable_jit);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let s = PoolSettings::from_lookup(|k| {
            (k == "REVIEWFLOW_DB_MAX_CONNECTIONS").then(|| "many".to_string())
        });
        assert_eq!(s.max_connections, 8);
    }
}
