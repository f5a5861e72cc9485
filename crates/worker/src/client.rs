//! HTTP client for the reviewflow worker routes.

use std::time::Duration;

use reqwest::StatusCode;
use reviewflow::api::models::{ClaimedJob, ResultSubmission, SessionRecord, WorkerJobStatus};
use uuid::Uuid;

const SECRET_HEADER: &str = "x-worker-secret";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection refused, DNS failure and the like.
    #[error("server unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("{route} answered {status}: {body}")]
    Status {
        route: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            ClientError::Unreachable(e)
        } else {
            ClientError::Transport(e)
        }
    }
}

#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    secret: Option<String>,
    worker_id: String,
}

impl ServerClient {
    pub fn new(
        base_url: impl Into<String>,
        secret: Option<String>,
        worker_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            secret,
            worker_id: worker_id.into(),
        })
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.get(format!("{}{}", self.base_url, path)))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.secret {
            Some(secret) => req.header(SECRET_HEADER, secret),
            None => req,
        }
    }

    /// `None` when the queue is empty.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>, ClientError> {
        let res = self
            .get("/api/worker/jobs")
            .query(&[("workerId", self.worker_id.as_str())])
            .send()
            .await?;

        if res.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let res = expect_success("claim", res).await?;
        Ok(Some(res.json().await?))
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<WorkerJobStatus, ClientError> {
        let res = self.get(&format!("/api/worker/jobs/{job_id}")).send().await?;
        let res = expect_success("job status", res).await?;
        Ok(res.json().await?)
    }

    /// `None` when the server holds no session record for the job's store and
    /// platform.
    pub async fn session(&self, job_id: Uuid) -> Result<Option<SessionRecord>, ClientError> {
        let res = self
            .get(&format!("/api/worker/jobs/{job_id}/session"))
            .send()
            .await?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = expect_success("session", res).await?;
        Ok(Some(res.json().await?))
    }

    pub async fn submit(
        &self,
        job_id: Uuid,
        submission: &ResultSubmission,
    ) -> Result<(), ClientError> {
        let url = format!("{}/api/worker/jobs/{job_id}/result", self.base_url);
        let res = self.authed(self.http.post(url)).json(submission).send().await?;
        expect_success("submit result", res).await?;
        Ok(())
    }
}

async fn expect_success(
    route: &'static str,
    res: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(ClientError::Status {
        route,
        status,
        body,
    })
}
