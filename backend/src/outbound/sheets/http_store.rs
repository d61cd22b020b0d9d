//! Reqwest-backed sheet store adapter.
//!
//! This adapter owns transport details only: URL construction, bearer
//! authentication, HTTP error mapping and JSON decoding of value ranges.
//! Retries belong to the coordinators, whose request budget bounds them. The
//! token fetch passes through the `auth` circuit as a single attempt, so a
//! transient credential failure surfaces to that budgeted retry loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use reqwest::{Client, Method, StatusCode, Url};
use tracing::debug;

use super::dto::ValueRangeDto;
use crate::domain::budget::ExecutionBudget;
use crate::domain::ports::{
    BearerToken, CredentialError, CredentialProvider, Row, SheetRange, SheetStore,
    SheetStoreError,
};
use crate::domain::resilience::{ExecuteOptions, ExecutionError, ResilientExecutor, RetryPolicy};

const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/";
const AUTH_OPERATION: &str = "auth";
const AUTH_POLICY: RetryPolicy = RetryPolicy {
    max_retries: 0,
    base_delay: Duration::ZERO,
    max_delay: Duration::ZERO,
    backoff_multiplier: 1.0,
};

/// Connection settings for [`HttpSheetStore`].
#[derive(Debug, Clone)]
pub struct HttpSheetStoreConfig {
    /// API root; paths are appended below it.
    pub api_base: Url,
    /// Spreadsheet holding every sheet.
    pub spreadsheet_id: String,
    /// Per-request timeout, also the ceiling of one token fetch.
    pub request_timeout: Duration,
}

impl HttpSheetStoreConfig {
    /// Settings for `spreadsheet_id` against the public API root.
    ///
    /// # Errors
    ///
    /// Returns an error when the built-in API root fails to parse.
    pub fn new(spreadsheet_id: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            api_base: Url::parse(DEFAULT_API_BASE)?,
            spreadsheet_id: spreadsheet_id.into(),
            request_timeout: Duration::from_secs(10),
        })
    }
}

/// Sheet store that performs HTTP requests against one spreadsheet.
pub struct HttpSheetStore {
    client: Client,
    config: HttpSheetStoreConfig,
    credentials: Arc<dyn CredentialProvider>,
    executor: Arc<ResilientExecutor>,
    clock: Arc<dyn Clock>,
}

impl HttpSheetStore {
    /// Build an adapter using a reqwest client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(
        config: HttpSheetStoreConfig,
        credentials: Arc<dyn CredentialProvider>,
        executor: Arc<ResilientExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            config,
            credentials,
            executor,
            clock,
        })
    }

    async fn token(&self) -> Result<BearerToken, SheetStoreError> {
        let budget = ExecutionBudget::start(
            Arc::clone(&self.clock),
            self.config.request_timeout,
            Duration::ZERO,
        );
        let options = ExecuteOptions::idempotent(AUTH_OPERATION, AUTH_POLICY);
        self.executor
            .execute(&options, &budget, |_| {
                let credentials = Arc::clone(&self.credentials);
                async move { credentials.bearer_token().await }
            })
            .await
            .map_err(map_credential_failure)
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, SheetStoreError> {
        values_url(&self.config.api_base, &self.config.spreadsheet_id, range, suffix)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&ValueRangeDto>,
    ) -> Result<Vec<u8>, SheetStoreError> {
        let token = self.token().await?;
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token.expose())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, bytes.as_ref()));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SheetStore for HttpSheetStore {
    async fn read_range(&self, range: &SheetRange) -> Result<Vec<Row>, SheetStoreError> {
        let mut url = self.values_url(&range.to_a1(), "")?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE");
        let body = self.send(Method::GET, url, None).await?;
        parse_rows(&body)
    }

    async fn write_rows(&self, range: &SheetRange, rows: &[Row]) -> Result<(), SheetStoreError> {
        let a1 = range.to_a1();
        let mut url = self.values_url(&a1, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = ValueRangeDto::rows(a1, rows);
        self.send(Method::PUT, url, Some(&body)).await?;
        Ok(())
    }

    async fn append_row(&self, sheet: &str, row: &Row) -> Result<(), SheetStoreError> {
        let range = SheetRange::sheet(sheet)
            .map_err(|error| SheetStoreError::invalid_request(error.to_string()))?;
        let a1 = range.to_a1();
        let mut url = self.values_url(&a1, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = ValueRangeDto::rows(a1, std::slice::from_ref(row));
        self.send(Method::POST, url, Some(&body)).await?;
        Ok(())
    }
}

fn values_url(
    api_base: &Url,
    spreadsheet_id: &str,
    range: &str,
    suffix: &str,
) -> Result<Url, SheetStoreError> {
    let mut url = api_base.clone();
    let last = format!("{range}{suffix}");
    url.path_segments_mut()
        .map_err(|()| SheetStoreError::invalid_request(format!("{api_base} cannot be a base URL")))?
        .pop_if_empty()
        .extend([
            "v4",
            "spreadsheets",
            spreadsheet_id,
            "values",
            last.as_str(),
        ]);
    Ok(url)
}

fn parse_rows(body: &[u8]) -> Result<Vec<Row>, SheetStoreError> {
    let decoded: ValueRangeDto = serde_json::from_slice(body).map_err(|error| {
        SheetStoreError::decode(format!("invalid value range payload: {error}"))
    })?;
    Ok(decoded.into_rows())
}

fn map_credential_failure(error: ExecutionError<CredentialError>) -> SheetStoreError {
    let message = error.to_string();
    match error {
        ExecutionError::Rejected { failure, .. } | ExecutionError::Exhausted { failure, .. } => {
            match failure {
                CredentialError::Unavailable { .. } => SheetStoreError::unavailable(message),
                CredentialError::Rejected { .. } | CredentialError::Missing => {
                    SheetStoreError::permission_denied(message)
                }
            }
        }
        ExecutionError::CircuitOpen { .. } | ExecutionError::BudgetExhausted { .. } => {
            SheetStoreError::unavailable(message)
        }
    }
}

fn map_transport_error(error: reqwest::Error) -> SheetStoreError {
    debug!(error = %error, "sheet service transport failure");
    if error.is_timeout() {
        SheetStoreError::timeout(error.to_string())
    } else if error.is_connect() {
        SheetStoreError::unavailable(error.to_string())
    } else {
        SheetStoreError::transport(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> SheetStoreError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };
    debug!(status = status.as_u16(), "sheet service returned an error status");

    match status {
        StatusCode::TOO_MANY_REQUESTS => SheetStoreError::rate_limited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SheetStoreError::permission_denied(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            SheetStoreError::timeout(message)
        }
        _ if status.is_client_error() => SheetStoreError::invalid_request(message),
        _ => SheetStoreError::unavailable(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
