//! Mapping gateway errors to HTTP responses.
//!
//! | Error | Status |
//! |---|---|
//! | `InvalidRequest` | 400 |
//! | `RateLimitExceeded` | 429 with `Retry-After` |
//! | `AllFallbacksExhausted` | 502 |
//! | `ServiceUnavailable`, `Cancelled` | 503 |

use std::time::SystemTime;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{Attempt, GatewayError};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "no_attempts")]
    tried: &'a [Attempt],
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

fn no_attempts(tried: &&[Attempt]) -> bool {
    tried.is_empty()
}

/// A [`GatewayError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

fn retry_after(reset_at: SystemTime) -> u64 {
    reset_at
        .duration_since(SystemTime::now())
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = &self.0;
        let (status, kind, retry) = match err {
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request", None),
            GatewayError::RateLimitExceeded { reset_at, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_exceeded",
                Some(retry_after(*reset_at)),
            ),
            GatewayError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            }
            GatewayError::AllFallbacksExhausted { .. } => {
                (StatusCode::BAD_GATEWAY, "all_fallbacks_exhausted", None)
            }
            GatewayError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled", None),
        };

        let body = ErrorBody {
            error: kind,
            message: err.to_string(),
            tried: err.attempts(),
            retry_after_secs: retry,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
