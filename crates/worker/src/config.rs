// Worker agent configuration, loaded from the environment.

use std::time::Duration;

use crate::adapters::AdapterTimeouts;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub server_url: String,
    pub worker_secret: Option<String>,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub cancel_check_interval: Duration,
    pub adapter_command: Option<String>,
    pub link_timeout: Duration,
    pub sync_timeout: Duration,
    pub reply_timeout: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let server_url = non_empty(&lookup, "SERVER_URL")
            .unwrap_or_else(|| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let worker_id = non_empty(&lookup, "WORKER_ID").unwrap_or_else(|| {
            format!("worker-{}", std::process::id())
        });

        Self {
            server_url,
            worker_secret: non_empty(&lookup, "WORKER_SECRET"),
            worker_id,
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS", 5_000),
            cancel_check_interval: millis(&lookup, "CANCEL_CHECK_INTERVAL_MS", 3_000),
            adapter_command: non_empty(&lookup, "ADAPTER_COMMAND"),
            link_timeout: secs(&lookup, "LINK_TIMEOUT_SECS", 120),
            sync_timeout: secs(&lookup, "SYNC_TIMEOUT_SECS", 600),
            reply_timeout: secs(&lookup, "REGISTER_REPLY_TIMEOUT_SECS", 120),
        }
    }

    pub fn adapter_timeouts(&self) -> AdapterTimeouts {
        AdapterTimeouts {
            link: self.link_timeout,
            sync: self.sync_timeout,
            register_reply: self.reply_timeout,
        }
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    let ms = non_empty(lookup, key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
        .max(10);
    Duration::from_millis(ms)
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    let s = non_empty(lookup, key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
        .max(1);
    Duration::from_secs(s)
}
