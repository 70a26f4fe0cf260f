use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::error::ErrorReport;

/// Body of a quota rejection. Machine-readable: clients key off
/// `errors.rate_limit` and `meta.retry_after`.
#[derive(Debug, Serialize)]
pub struct RateLimitBody {
    pub message: String,
    pub errors: RateLimitErrors,
    pub meta: RateLimitMeta,
}

#[derive(Debug, Serialize)]
pub struct RateLimitErrors {
    pub rate_limit: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitMeta {
    pub retry_after: u64,
    pub limit: u32,
}

/// Build the 429 rejection response for a caller that exhausted its quota.
pub fn rate_limited(limit: u32, retry_after: u64) -> Response {
    let body = RateLimitBody {
        message: "Too many requests".to_string(),
        errors: RateLimitErrors {
            rate_limit: vec![format!(
                "Rate limit of {limit} requests per window exceeded. Retry in {retry_after} seconds."
            )],
        },
        meta: RateLimitMeta { retry_after, limit },
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, value);
    }
    ErrorReport::from_message(
        "infra::http::rate_limit",
        StatusCode::TOO_MANY_REQUESTS,
        format!("rate_limited: retry_after={retry_after}"),
    )
    .attach(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_carries_status_and_retry_after() {
        let response = rate_limited(60, 42);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn body_shape_is_machine_readable() {
        let body = RateLimitBody {
            message: "Too many requests".to_string(),
            errors: RateLimitErrors {
                rate_limit: vec!["limit exceeded".to_string()],
            },
            meta: RateLimitMeta {
                retry_after: 30,
                limit: 60,
            },
        };

        let value = serde_json::to_value(&body).expect("serializable");
        assert_eq!(value["meta"]["limit"], 60);
        assert_eq!(value["meta"]["retry_after"], 30);
        assert!(value["errors"]["rate_limit"].is_array());
    }
}
