//! JSON/HTTP client for the remote batch job service.
//!
//! This module provides functionality to:
//! - Create a batch job for one account
//! - Upload operations to a job's upload URL, chunk by chunk
//! - Query the status of many jobs in one round trip
//!
//! # Security
//!
//! - Access and developer tokens are never logged
//! - Upload URLs are signed and never logged
//! - Only HTTP method, path, and status codes are logged

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::adwords::{BatchJobStatus, WireOperation};
use crate::config::ApiSettings;
use crate::error::AppError;
use crate::storage::ledger::redact_id;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A remote job as returned by creation: where to stream its operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub account_id: i64,
    pub job_id: String,
    pub upload_url: String,
    pub status: BatchJobStatus,
}

/// Status snapshot of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusInfo {
    pub job_id: String,
    pub status: BatchJobStatus,
    /// Raw progress counters as reported remotely.
    pub progress: BTreeMap<String, i64>,
    /// Set once results are downloadable.
    pub result_url: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateJobRequest {
    operator: &'static str,
}

#[derive(Debug, Deserialize)]
struct UrlHolder {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchJobWire {
    id: String,
    status: String,
    #[serde(default)]
    upload_url: Option<UrlHolder>,
    #[serde(default)]
    download_url: Option<UrlHolder>,
    #[serde(default)]
    progress_stats: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    operations: &'a [WireOperation],
    is_last: bool,
}

#[derive(Debug, Serialize)]
struct StatusQuery<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct StatusPage {
    #[serde(default)]
    value: Vec<BatchJobWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    error_code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    errors: Vec<ApiError>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchJobHttpClient
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the remote batch job endpoints.
#[derive(Clone)]
pub struct BatchJobHttpClient {
    /// Shared HTTP client.
    client: Arc<Client>,
    /// Service root; endpoint paths are joined onto it.
    base_url: Url,
    access_token: SecretString,
    developer_token: SecretString,
}

impl BatchJobHttpClient {
    pub fn new(
        client: Arc<Client>,
        base_url: Url,
        access_token: SecretString,
        developer_token: SecretString,
    ) -> Self {
        Self {
            client,
            base_url,
            access_token,
            developer_token,
        }
    }

    /// Builds a client with the configured base URL and request timeout.
    pub fn from_settings(
        settings: &ApiSettings,
        access_token: SecretString,
        developer_token: SecretString,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| AppError::Config(format!("Invalid api.base_url: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::new(
            Arc::new(client),
            base_url,
            access_token,
            developer_token,
        ))
    }

    /// Creates a batch job for the account.
    ///
    /// # Errors
    ///
    /// - `AppError::RemoteError` - API error or missing upload URL
    /// - `AppError::RateLimited` - Rate limit exceeded
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn create_job(&self, account_id: i64) -> Result<BatchJob, AppError> {
        let url = self.endpoint("batchjobs")?;

        info!("[BATCH-API] POST /batchjobs (account {})", account_id);

        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .header("developerToken", self.developer_token.expose_secret())
            .header("clientCustomerId", account_id.to_string())
            .json(&CreateJobRequest { operator: "ADD" })
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Batch job creation failed: {}", e)))?;

        let status = response.status();
        info!("[BATCH-API] POST /batchjobs -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let job: BatchJobWire = response.json().await.map_err(|e| {
            AppError::RemoteError(format!("Failed to parse job creation response: {}", e))
        })?;

        let upload_url = job
            .upload_url
            .map(|u| u.url)
            .ok_or_else(|| AppError::RemoteError("Created job has no upload URL".to_string()))?;

        Ok(BatchJob {
            account_id,
            job_id: job.id,
            upload_url,
            status: BatchJobStatus::parse_lenient(&job.status),
        })
    }

    /// Uploads one chunk of operations. `is_last` closes the upload stream.
    pub async fn upload_operations(
        &self,
        job: &BatchJob,
        operations: &[WireOperation],
        is_last: bool,
    ) -> Result<(), AppError> {
        let url = Url::parse(&job.upload_url)
            .map_err(|e| AppError::RemoteError(format!("Invalid upload URL: {}", e)))?;

        info!(
            "[BATCH-API] PUT upload for job {} ({} operations, last={})",
            redact_id(&job.job_id),
            operations.len(),
            is_last
        );

        let response = self
            .client
            .put(url)
            .json(&UploadRequest {
                operations,
                is_last,
            })
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Operation upload failed: {}", e)))?;

        let status = response.status();
        info!(
            "[BATCH-API] PUT upload for job {} -> {}",
            redact_id(&job.job_id),
            status.as_u16()
        );

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        Ok(())
    }

    /// Fetches the status of every listed job in one request.
    pub async fn query_status(&self, job_ids: &[String]) -> Result<Vec<JobStatusInfo>, AppError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("batchjobs/query")?;

        info!("[BATCH-API] POST /batchjobs/query ({} jobs)", job_ids.len());

        let response = self
            .client
            .post(url)
            .bearer_auth(self.access_token.expose_secret())
            .header("developerToken", self.developer_token.expose_secret())
            .json(&StatusQuery { ids: job_ids })
            .send()
            .await
            .map_err(|e| AppError::ConnectionFailed(format!("Status query failed: {}", e)))?;

        let status = response.status();
        info!("[BATCH-API] POST /batchjobs/query -> {}", status.as_u16());

        if !status.is_success() {
            return Err(parse_error_response(response, status).await);
        }

        let page: StatusPage = response.json().await.map_err(|e| {
            AppError::RemoteError(format!("Failed to parse status response: {}", e))
        })?;

        debug!("[BATCH-API] status query returned {} jobs", page.value.len());

        Ok(page
            .value
            .into_iter()
            .map(|job| JobStatusInfo {
                job_id: job.id,
                status: BatchJobStatus::parse_lenient(&job.status),
                progress: job.progress_stats,
                result_url: job.download_url.map(|u| u.url),
            })
            .collect())
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Failed to build {} URL: {}", path, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a non-success response onto an `AppError`.
async fn parse_error_response(response: reqwest::Response, status: reqwest::StatusCode) -> AppError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return AppError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return AppError::NotFound("Batch job not found".to_string());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(&body) {
        if let Some(first_error) = parsed.errors.first() {
            if first_error.error_code == "RATE_EXCEEDED" {
                return AppError::RateLimited {
                    retry_after_secs: None,
                };
            }

            return AppError::RemoteError(format!(
                "[{}] {}",
                first_error.error_code, first_error.message
            ));
        }
    }

    AppError::RemoteError(format!(
        "HTTP {} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown error")
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adwords::Operator;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Helper to create a test client pointing to mock server.
    fn create_test_client(mock_url: &str) -> BatchJobHttpClient {
        BatchJobHttpClient::new(
            Arc::new(Client::new()),
            Url::parse(mock_url).unwrap(),
            SecretString::from("test_token".to_string()),
            SecretString::from("dev_token".to_string()),
        )
    }

    fn test_job(upload_url: String) -> BatchJob {
        BatchJob {
            account_id: 1234567890,
            job_id: "987654321012".to_string(),
            upload_url,
            status: BatchJobStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_create_job_success() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let response_body = serde_json::json!({
            "id": "987654321012",
            "status": "ACTIVE",
            "uploadUrl": { "url": format!("{}/upload/987654321012", mock_server.uri()) }
        });

        Mock::given(method("POST"))
            .and(path("/batchjobs"))
            .and(header("Authorization", "Bearer test_token"))
            .and(header("developerToken", "dev_token"))
            .and(header("clientCustomerId", "1234567890"))
            .and(body_json(serde_json::json!({ "operator": "ADD" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let job = client.create_job(1234567890).await.expect("create_job");

        assert_eq!(job.job_id, "987654321012");
        assert_eq!(job.account_id, 1234567890);
        assert_eq!(job.status, BatchJobStatus::Active);
        assert!(job.upload_url.ends_with("/upload/987654321012"));
    }

    #[tokio::test]
    async fn test_create_job_without_upload_url_is_error() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/batchjobs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "1", "status": "ACTIVE" })),
            )
            .mount(&mock_server)
            .await;

        let err = client.create_job(1).await.unwrap_err();
        assert!(matches!(err, AppError::RemoteError(_)));
    }

    #[tokio::test]
    async fn test_upload_sends_operations_and_last_flag() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let ops = vec![WireOperation {
            operation_type: "AdGroupOperation".into(),
            operator: Operator::Set,
            operand: serde_json::json!({ "id": 5, "name": "renamed" }),
        }];

        let expected = serde_json::json!({
            "operations": [{
                "operationType": "AdGroupOperation",
                "operator": "SET",
                "operand": { "id": 5, "name": "renamed" }
            }],
            "isLast": true
        });

        Mock::given(method("PUT"))
            .and(path("/upload/987654321012"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let job = test_job(format!("{}/upload/987654321012", mock_server.uri()));
        client
            .upload_operations(&job, &ops, true)
            .await
            .expect("upload should succeed");
    }

    #[tokio::test]
    async fn test_query_status_parses_progress_and_download_url() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        let response_body = serde_json::json!({
            "value": [
                {
                    "id": "1",
                    "status": "DONE",
                    "progressStats": { "NumOperationsExecuted": 10, "NumOperationsSucceeded": 9 },
                    "downloadUrl": { "url": "https://results/1" }
                },
                { "id": "2", "status": "SOMETHING_NEW" }
            ]
        });

        Mock::given(method("POST"))
            .and(path("/batchjobs/query"))
            .and(body_json(serde_json::json!({ "ids": ["1", "2"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response_body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let statuses = client
            .query_status(&["1".to_string(), "2".to_string()])
            .await
            .expect("query_status");

        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, BatchJobStatus::Done);
        assert_eq!(statuses[0].result_url.as_deref(), Some("https://results/1"));
        assert_eq!(statuses[0].progress.get("NumOperationsExecuted"), Some(&10));
        assert_eq!(statuses[1].status, BatchJobStatus::Processing);
        assert!(statuses[1].result_url.is_none());
    }

    #[tokio::test]
    async fn test_query_status_empty_skips_request() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        assert!(client.query_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_reads_retry_after() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/batchjobs"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&mock_server)
            .await;

        let err = client.create_job(1).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::RateLimited {
                retry_after_secs: Some(7)
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let job = test_job(format!("{}/upload/gone", mock_server.uri()));
        let err = client.upload_operations(&job, &[], true).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_structured_error_body() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/batchjobs/query"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": [{ "errorCode": "INVALID_ID", "message": "job id is malformed" }]
            })))
            .mount(&mock_server)
            .await;

        let err = client.query_status(&["x".to_string()]).await.unwrap_err();
        match err {
            AppError::RemoteError(msg) => {
                assert!(msg.contains("INVALID_ID"));
                assert!(msg.contains("malformed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_exceeded_code_is_rate_limited() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": [{ "errorCode": "RATE_EXCEEDED", "message": "slow down" }]
            })))
            .mount(&mock_server)
            .await;

        let err = client.create_job(1).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs: None }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failure() {
        let client = create_test_client("http://127.0.0.1:1");
        let err = client.create_job(1).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionFailed(_)));
    }

    #[test]
    fn from_settings_rejects_bad_base_url() {
        let settings = ApiSettings {
            base_url: "not a url".to_string(),
            timeout_secs: 5,
        };
        let result = BatchJobHttpClient::from_settings(
            &settings,
            SecretString::from("a".to_string()),
            SecretString::from("b".to_string()),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
