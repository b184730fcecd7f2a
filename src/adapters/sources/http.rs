//! Shared HTTP plumbing for source adapters
//!
//! Maps transport failures and HTTP statuses onto `SourceError`:
//! - timeouts, connect errors, 429 and 5xx are transient
//! - 404, other 4xx and undecodable bodies are permanent

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::ports::SourceError;

/// Default request timeout for every source
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

const USER_AGENT: &str = concat!("token-radar/", env!("CARGO_PKG_VERSION"));

/// Body prefix kept in error messages
const MAX_ERROR_BODY: usize = 200;

pub fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SourceError::permanent(format!("failed to build HTTP client: {}", e)))
}

/// Classify a non-success status
pub fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        SourceError::transient(format!("rate limited (429): {}", body))
    } else if status.is_server_error() {
        SourceError::transient(format!("server error {}: {}", status, body))
    } else if status == StatusCode::NOT_FOUND {
        SourceError::permanent(format!("not found (404): {}", body))
    } else {
        SourceError::permanent(format!("API error {}: {}", status, body))
    }
}

/// Classify a reqwest transport error
pub fn classify_transport(err: &reqwest::Error) -> SourceError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        SourceError::transient(format!("request failed: {}", err))
    } else if err.is_decode() {
        SourceError::permanent(format!("invalid response body: {}", err))
    } else if let Some(status) = err.status() {
        classify_status(status, "")
    } else {
        SourceError::transient(format!("HTTP error: {}", err))
    }
}

/// Send `request` and decode a JSON body
pub async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, SourceError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
    decode_json(&bytes)
}

/// Decode a JSON payload, treating malformed bodies as permanent failures
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SourceError> {
    serde_json::from_slice(bytes)
        .map_err(|e| SourceError::permanent(format!("failed to parse response: {}", e)))
}

/// Liveness probe: any 2xx within the timeout counts as healthy
pub async fn probe(request: RequestBuilder) -> bool {
    match request.send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(error = %e, "Health probe failed");
            false
        }
    }
}

/// Accept `address` as a single URL path segment; only ASCII alphanumerics pass
pub fn path_segment(address: &str) -> Result<&str, SourceError> {
    if !address.is_empty() && address.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(address)
    } else {
        Err(SourceError::permanent(format!("invalid token address: {:?}", address)))
    }
}

/// Parse a numeric field that some APIs send as a string
pub fn parse_f64(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            SourceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "upstream"),
            SourceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            SourceError::Transient(_)
        ));
    }

    #[test]
    fn test_client_errors_are_permanent() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            SourceError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            SourceError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            SourceError::Permanent(_)
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(1_000);
        let err = classify_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn test_malformed_json_is_permanent() {
        #[derive(Debug, Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            value: u32,
        }

        let err = decode_json::<Payload>(b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, SourceError::Permanent(_)));
        assert_eq!(decode_json::<Payload>(br#"{"value": 7}"#).unwrap().value, 7);
    }

    #[test]
    fn test_path_segment_rejects_url_syntax() {
        assert_eq!(
            path_segment("So11111111111111111111111111111111111111112").unwrap(),
            "So11111111111111111111111111111111111111112"
        );
        for bad in ["", "abc/report", "abc?x=1", "abc#frag", "a%2Fb", "a b", "../etc"] {
            assert!(
                matches!(path_segment(bad), Err(SourceError::Permanent(_))),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_parse_f64_tolerates_garbage() {
        assert_eq!(parse_f64(Some("1.25")), 1.25);
        assert_eq!(parse_f64(Some(" 3 ")), 3.0);
        assert_eq!(parse_f64(Some("abc")), 0.0);
        assert_eq!(parse_f64(Some("NaN")), 0.0);
        assert_eq!(parse_f64(None), 0.0);
    }

    #[test]
    fn test_client_builds() {
        assert!(build_client(Duration::from_secs(DEFAULT_TIMEOUT_SECS)).is_ok());
    }
}
