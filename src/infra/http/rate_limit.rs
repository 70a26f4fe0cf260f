//! Admission-control stage.
//!
//! Resolves the caller to a stable actor key, charges the quota ledger, and
//! either rejects with 429 or forwards the call and annotates whatever
//! response comes back with quota visibility headers.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use tracing::debug;

use crate::application::quota::AdmitDecision;
use crate::domain::actor::{ActorIdentity, AuthClaims, UNKNOWN_FINGERPRINT, UNKNOWN_IP};

use super::EdgeState;
use super::error::rate_limited;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

const FINGERPRINT_HEADER: &str = "x-client-fingerprint";
const REAL_IP_HEADER: &str = "x-real-ip";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

const METRIC_ALLOWED: &str = "varco_quota_allowed_total";
const METRIC_REJECTED: &str = "varco_quota_rejected_total";

/// Admission control over every inbound call. Runs before the cache stage
/// and the handler, so a rejected call costs one counter increment and
/// nothing else.
pub async fn rate_limit_layer(
    State(edge): State<EdgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let actor = resolve_actor(&request);
    let limit = edge.rate_limit.limit_for(actor.tier());
    let window = edge.rate_limit.window();

    let decision = edge.ledger.admit(&actor.ledger_key(), limit, window).await;

    if !decision.allowed {
        counter!(METRIC_REJECTED).increment(1);
        debug!(
            target = "varco::http::rate_limit",
            key = %actor.ledger_key(),
            limit,
            "quota exhausted, rejecting"
        );
        let retry_after = decision.reset_in.as_secs().max(1);
        let mut response = rate_limited(limit, retry_after);
        apply_quota_headers(&mut response, &decision);
        return response;
    }

    counter!(METRIC_ALLOWED).increment(1);
    let mut response = next.run(request).await;
    apply_quota_headers(&mut response, &decision);
    response
}

/// Derive the caller identity from auth claims, proxy-aware address
/// headers, and the client fingerprint header.
fn resolve_actor(request: &Request<Body>) -> ActorIdentity {
    let claims = request.extensions().get::<AuthClaims>().cloned();

    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let ip = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(FORWARDED_FOR_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|list| list.split(',').map(str::trim).find(|ip| !ip.is_empty()))
        })
        .map(|ip| ip.trim().to_string())
        .or(peer_ip)
        .unwrap_or_else(|| UNKNOWN_IP.to_string());

    let fingerprint = request
        .headers()
        .get(FINGERPRINT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|fingerprint| !fingerprint.is_empty())
        .unwrap_or(UNKNOWN_FINGERPRINT)
        .to_string();

    ActorIdentity {
        claims,
        ip,
        fingerprint,
    }
}

/// Quota visibility headers, present on rejections and on every response
/// that passed through this stage.
fn apply_quota_headers(response: &mut Response, decision: &AdmitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(HEADER_LIMIT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(HEADER_REMAINING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_in.as_secs().to_string()) {
        headers.insert(HEADER_RESET, value);
    }
}
