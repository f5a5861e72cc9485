// Runtime configuration for reviewflowd, loaded from the environment.

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: String,
    pub worker_secret: Option<String>,
    pub session_key: Option<String>,
    pub migrate_on_startup: bool,
    pub maintenance_interval_secs: u64,
    pub stale_processing_secs: i64,
    pub review_retention_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = non_empty(&lookup, "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let listen_addr = env_or_fallback(&lookup, "REVIEWFLOW_ADDR", "ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let worker_secret = non_empty(&lookup, "WORKER_SECRET");

        let session_key = env_or_fallback(
            &lookup,
            "SESSION_ENCRYPTION_KEY",
            "PLATFORM_SESSION_ENCRYPTION_KEY",
        );

        let migrate_on_startup = env_bool(&lookup, "REVIEWFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let maintenance_interval_secs = non_empty(&lookup, "MAINTENANCE_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60)
            .max(1);

        let stale_processing_secs = non_empty(&lookup, "STALE_PROCESSING_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1800)
            .max(1);

        let review_retention_days = non_empty(&lookup, "REVIEW_RETENTION_DAYS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(180)
            .max(1);

        Ok(Self {
            database_url,
            listen_addr,
            worker_secret,
            session_key,
            migrate_on_startup,
            maintenance_interval_secs,
            stale_processing_secs,
            review_retention_days,
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.trim().is_empty())
}

fn env_or_fallback(
    lookup: &impl Fn(&str) -> Option<String>,
    primary: &str,
    fallback: &str,
) -> Option<String> {
    non_empty(lookup, primary).or_else(|| non_empty(lookup, fallback))
}

fn env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    lookup(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
