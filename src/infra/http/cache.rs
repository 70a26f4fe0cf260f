//! Conditional response-cache stage.
//!
//! Stamps shared-cache directives and a strong ETag on public content reads
//! and answers conditional requests with 304 instead of re-sending the
//! body. The server keeps no copy of prior bodies: the client-sent
//! validator is the only cache state, and the fingerprint is recomputed
//! from the live body on every call.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::actor::AuthClaims;

use super::EdgeState;

const METRIC_NOT_MODIFIED: &str = "varco_cache_not_modified_total";
const METRIC_BYPASS: &str = "varco_cache_bypass_total";

const NO_STORE: &str = "private, no-cache, no-store, must-revalidate";
const VARY_VALUE: &str = "Accept, Accept-Encoding";
const MAX_BUFFERED_BODY_BYTES: usize = 1024 * 1024;

/// Response post-processing for cacheable reads.
///
/// Ineligible calls pass straight through with an explicit no-store
/// directive; no fingerprint is computed for them. Eligible calls get
/// shared-cache headers on success, and a 304 rewrite when the client's
/// validator still matches the current body.
pub async fn response_cache_layer(
    State(edge): State<EdgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cacheable_request(&request, &edge.admin_prefix) {
        counter!(METRIC_BYPASS).increment(1);
        let mut response = next.run(request).await;
        set_no_store(&mut response);
        return response;
    }

    let path = request.uri().path().to_string();
    let validator = request
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string());

    let response = next.run(request).await;

    // Errors from the handler propagate untouched except for an explicit
    // no-store, so intermediaries can never cache an error page.
    if response.status() != StatusCode::OK {
        let mut response = response;
        set_no_store(&mut response);
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BUFFERED_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let max_age = edge.policy.max_age(&path).as_secs();
    parts
        .headers
        .insert(header::CACHE_CONTROL, cache_control_value(max_age));
    parts
        .headers
        .insert(header::VARY, HeaderValue::from_static(VARY_VALUE));

    if bytes.is_empty() {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let etag = body_fingerprint(&bytes);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        parts.headers.insert(header::ETAG, value);
    }

    // Compare only after the fresh fingerprint exists: a stale validator
    // must fall through to a full 200 carrying the new content.
    if validator.as_deref() == Some(etag.as_str()) {
        counter!(METRIC_NOT_MODIFIED).increment(1);
        debug!(
            target = "varco::http::cache",
            path = %path,
            "validator matched, serving 304"
        );
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(header::CONTENT_LENGTH);
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Eligibility gate: safe read method, anonymous, no credential header, and
/// not an administrative route.
fn cacheable_request(request: &Request<Body>, admin_prefix: &str) -> bool {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return false;
    }
    if request.extensions().get::<AuthClaims>().is_some() {
        return false;
    }
    if request.headers().contains_key(header::AUTHORIZATION) {
        return false;
    }
    if request.uri().path().starts_with(admin_prefix) {
        return false;
    }
    true
}

/// Strong validator over the exact serialized body bytes.
///
/// Hashing is O(body size) on every cacheable call, acceptable for small
/// JSON payloads; larger bodies would need a streaming digest.
fn body_fingerprint(bytes: &Bytes) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", hex::encode(digest))
}

/// Client-facing max-age plus a doubled shared/proxy max-age.
fn cache_control_value(max_age: u64) -> HeaderValue {
    let directive = format!("public, max-age={max_age}, s-maxage={}", max_age * 2);
    HeaderValue::from_str(&directive).unwrap_or_else(|_| HeaderValue::from_static(NO_STORE))
}

fn set_no_store(response: &mut Response) {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::actor::Role;

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn plain_get_is_cacheable() {
        assert!(cacheable_request(&get("/api/v1/articles"), "/api/v1/admin"));
    }

    #[test]
    fn unsafe_methods_are_not_cacheable() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/articles")
            .body(Body::empty())
            .unwrap();
        assert!(!cacheable_request(&req, "/api/v1/admin"));
    }

    #[test]
    fn authorization_header_blocks_caching() {
        let req = Request::builder()
            .uri("/api/v1/articles")
            .header(header::AUTHORIZATION, "Bearer token")
            .body(Body::empty())
            .unwrap();
        assert!(!cacheable_request(&req, "/api/v1/admin"));
    }

    #[test]
    fn authenticated_claims_block_caching() {
        let mut req = get("/api/v1/articles");
        req.extensions_mut().insert(AuthClaims {
            user_id: 3,
            role: Role::User,
        });
        assert!(!cacheable_request(&req, "/api/v1/admin"));
    }

    #[test]
    fn administrative_routes_are_never_cacheable() {
        assert!(!cacheable_request(
            &get("/api/v1/admin/articles"),
            "/api/v1/admin"
        ));
    }

    #[test]
    fn fingerprint_is_deterministic_and_quoted() {
        let body = Bytes::from_static(b"{\"items\":[]}");
        let a = body_fingerprint(&body);
        let b = body_fingerprint(&body);

        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_ne!(a, body_fingerprint(&Bytes::from_static(b"{\"items\":[1]}")));
    }

    #[test]
    fn cache_control_doubles_shared_max_age() {
        let value = cache_control_value(1800);
        assert_eq!(value.to_str().unwrap(), "public, max-age=1800, s-maxage=3600");
    }
}
