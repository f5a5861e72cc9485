use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate};
use reviewflow::api::models::{ClaimedJob, SessionRecord};
use reviewflow::{JobKind, Operation, Platform};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sync jobs without an explicit window fetch this many days back.
pub const DEFAULT_SYNC_WINDOW_DAYS: i64 = 180;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("cancelled by user")]
    Cancelled,

    #[error("adapter timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),

    #[error("no adapter registered for {0}")]
    Unsupported(String),
}

/// What an adapter receives for one job.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterRequest {
    pub job_id: Uuid,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub store_id: Uuid,
    pub user_id: Uuid,
    pub payload: Value,
    pub session: Option<SessionRecord>,
}

impl AdapterRequest {
    pub fn new(
        job: &ClaimedJob,
        kind: JobKind,
        session: Option<SessionRecord>,
        today: NaiveDate,
    ) -> Self {
        let mut payload = job.payload.clone();
        if kind.operation == Operation::Sync {
            fill_sync_window(&mut payload, today);
        }

        Self {
            job_id: job.id,
            kind,
            store_id: job.store_id,
            user_id: job.user_id,
            payload,
            session,
        }
    }

    pub fn platform(&self) -> Platform {
        self.kind.platform
    }

    pub fn operation(&self) -> Operation {
        self.kind.operation
    }
}

fn fill_sync_window(payload: &mut Value, today: NaiveDate) {
    let Value::Object(obj) = payload else {
        return;
    };
    let from = today - Days::days(DEFAULT_SYNC_WINDOW_DAYS);
    obj.entry("from")
        .or_insert_with(|| Value::String(from.format("%Y-%m-%d").to_string()));
    obj.entry("to")
        .or_insert_with(|| Value::String(today.format("%Y-%m-%d").to_string()));
}

/// Drives one delivery platform. Each method returns the raw result the
/// server reconciles; unimplemented operations report `Unsupported`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn link(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        Err(AdapterError::Unsupported(req.kind.to_string()))
    }

    async fn sync(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        Err(AdapterError::Unsupported(req.kind.to_string()))
    }

    async fn register_reply(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        Err(AdapterError::Unsupported(req.kind.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterTimeouts {
    pub link: Duration,
    pub sync: Duration,
    pub register_reply: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            link: Duration::from_secs(2 * 60),
            sync: Duration::from_secs(10 * 60),
            register_reply: Duration::from_secs(2 * 60),
        }
    }
}

impl AdapterTimeouts {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Link => self.link,
            Operation::Sync => self.sync,
            Operation::RegisterReply => self.register_reply,
        }
    }
}

#[derive(Clone)]
pub struct AdapterEntry {
    adapter: Arc<dyn PlatformAdapter>,
    timeouts: AdapterTimeouts,
}

impl AdapterEntry {
    /// Runs the adapter until it finishes, times out, or `cancel` fires.
    /// Losing the race drops the adapter future.
    pub async fn run(
        &self,
        req: &AdapterRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, AdapterError> {
        let limit = self.timeouts.for_operation(req.operation());
        let fut = match req.operation() {
            Operation::Link => self.adapter.link(req),
            Operation::Sync => self.adapter.sync(req),
            Operation::RegisterReply => self.adapter.register_reply(req),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
            res = tokio::time::timeout(limit, fut) => {
                res.unwrap_or(Err(AdapterError::Timeout(limit)))
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, AdapterEntry>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) {
        self.register_with_timeouts(platform, adapter, AdapterTimeouts::default());
    }

    pub fn register_with_timeouts(
        &mut self,
        platform: Platform,
        adapter: Arc<dyn PlatformAdapter>,
        timeouts: AdapterTimeouts,
    ) {
        self.adapters
            .insert(platform, AdapterEntry { adapter, timeouts });
    }

    pub fn adapter_for(&self, platform: Platform) -> Option<AdapterEntry> {
        self.adapters.get(&platform).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
