//! Shared HTTP plumbing for the remote KV clients.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use url::Url;

use crate::persistence::{PersistenceError, PersistenceResult};

pub(super) fn build_client(timeout: Duration) -> PersistenceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| PersistenceError::Unavailable(format!("HTTP client setup failed: {e}")))
}

/// Parse the endpoint and drop any trailing `/`.
pub(super) fn base_url(endpoint: &str) -> PersistenceResult<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| PersistenceError::Unavailable(format!("invalid endpoint '{endpoint}': {e}")))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

pub(super) fn transport_error(err: reqwest::Error, timeout: Duration) -> PersistenceError {
    if err.is_timeout() {
        PersistenceError::Timeout(timeout)
    } else {
        PersistenceError::Unavailable(err.to_string())
    }
}

/// Pass 2xx responses through; turn the rest into errors.
///
/// Server-side failures are `Unavailable` (retryable), client-side are
/// `Rejected`.
pub(super) async fn check_status(response: Response) -> PersistenceResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {}", body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(PersistenceError::Unavailable(message))
    } else {
        Err(PersistenceError::Rejected(message))
    }
}
