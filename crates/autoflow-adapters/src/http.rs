//! Shared HTTP plumbing for the adapters.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::{AdapterError, Result};

/// Default per-request timeout for adapter HTTP clients.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("autoflow/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client every adapter uses.
pub fn client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Turn a response into its JSON body, or into the matching error.
///
/// 401/403 become credential errors, 429 a rate-limit error (carrying
/// `Retry-After` when given), any other non-success status an
/// external-service error with the service's own message.
pub async fn json_body(service: &'static str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let retry_after = retry_after(&response);
    let text = response.text().await?;

    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&text).map_err(|e| AdapterError::ExternalService {
            service,
            status: Some(status.as_u16()),
            reason: format!("malformed response body: {e}"),
        });
    }

    debug!(service, status = status.as_u16(), "request rejected");
    let reason = error_message(&text).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AdapterError::Credential {
            service,
            reason: format!("HTTP {}: {reason}", status.as_u16()),
        },
        StatusCode::TOO_MANY_REQUESTS => AdapterError::RateLimited {
            service,
            retry_after,
        },
        _ => AdapterError::ExternalService {
            service,
            status: Some(status.as_u16()),
            reason,
        },
    })
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Pull a human message out of the common error body shapes:
/// `{"error": {"message": ..}}`, `{"error": ".."}`, `{"message": ..}`,
/// `{"description": ..}`.
fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let message = json
        .pointer("/error/message")
        .or_else(|| json.get("error").filter(|v| v.is_string()))
        .or_else(|| json.get("message"))
        .or_else(|| json.get("description"))?;
    message.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"bad model"}}"#).as_deref(),
            Some("bad model")
        );
        assert_eq!(
            error_message(r#"{"object":"error","message":"Could not find database"}"#).as_deref(),
            Some("Could not find database")
        );
        assert_eq!(
            error_message(r#"{"ok":false,"description":"Bad Request: chat not found"}"#)
                .as_deref(),
            Some("Bad Request: chat not found")
        );
        assert_eq!(error_message("<html>oops</html>"), None);
    }
}
