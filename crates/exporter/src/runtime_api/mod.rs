use std::future::Future;

use nanoserde::SerJson;
use thiserror::Error;

use crate::config::ConfigError;
use crate::metric::MetricError;
use crate::processor::ProcessError;

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

pub trait RuntimeApi {
    fn next_invocation(&self) -> impl Future<Output = Result<Invocation, ApiError>> + Send + '_;
    fn respond(
        &self,
        request_id: &str,
        body: String,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
    fn report_invocation_error(
        &self,
        request_id: &str,
        error: &InvocationError,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("runtime API HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,
    #[error("runtime API rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failure before the first invocation is served.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl InitError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "Runtime.ConfigInvalid",
        }
    }
}

/// Failure of a single invocation, reported back against its request id.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("invalid metric event: {0}")]
    InvalidEvent(#[source] serde_json::Error),
    #[error("invalid metric event: {0}")]
    InvalidMetric(#[from] MetricError),
    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl InvocationError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) | Self::InvalidMetric(_) => "Function.InvalidEvent",
            Self::Encode(_) | Self::Process(_) => "Function.ProcessFailed",
        }
    }
}

#[derive(SerJson)]
struct ErrorRequest {
    #[nserde(rename = "errorMessage")]
    error_message: String,
    #[nserde(rename = "errorType")]
    error_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub request_id: String,
    pub deadline_ms: Option<u64>,
    pub body: String,
}

#[derive(Debug)]
pub struct RuntimeApiClient {
    client: reqwest::Client,
    runtime_api: String,
}

impl RuntimeApiClient {
    pub fn new(runtime_api: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            runtime_api: runtime_api.to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/{API_VERSION}/runtime/{path}", self.runtime_api)
    }

    /// Best effort: the process exits right after, so failures are only logged.
    pub async fn report_init_error(&self, error: &InitError) {
        let result = self
            .post_error(self.url("init/error"), error.error_type(), error.to_string())
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to report init error");
        }
    }

    async fn post_error(
        &self,
        url: String,
        error_type: &str,
        error_message: String,
    ) -> Result<(), ApiError> {
        let body = ErrorRequest {
            error_message,
            error_type: error_type.to_owned(),
        }
        .serialize_json();

        let resp = self
            .client
            .post(url)
            .header(ERROR_TYPE_HEADER, error_type)
            .body(body)
            .send()
            .await?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<(), ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Rejected {
        status: status.as_u16(),
        body,
    })
}

fn parse_invocation(headers: &reqwest::header::HeaderMap, body: String) -> Result<Invocation, ApiError> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingRequestId)?
        .to_owned();

    let deadline_ms = headers
        .get(DEADLINE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    Ok(Invocation {
        request_id,
        deadline_ms,
        body,
    })
}

impl RuntimeApi for RuntimeApiClient {
    async fn next_invocation(&self) -> Result<Invocation, ApiError> {
        let resp = self.client.get(self.url("invocation/next")).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let headers = resp.headers().clone();
        let body = resp.text().await?;
        parse_invocation(&headers, body)
    }

    async fn respond(&self, request_id: &str, body: String) -> Result<(), ApiError> {
        let resp = self
            .client
            .post(self.url(&format!("invocation/{request_id}/response")))
            .body(body)
            .send()
            .await?;
        check_status(resp).await
    }

    async fn report_invocation_error(
        &self,
        request_id: &str,
        error: &InvocationError,
    ) -> Result<(), ApiError> {
        self.post_error(
            self.url(&format!("invocation/{request_id}/error")),
            error.error_type(),
            error.to_string(),
        )
        .await
    }
}
