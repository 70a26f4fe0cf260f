//! # varco
//!
//! An edge request-control layer for content APIs.
//!
//! Two cooperating middleware stages sit in front of every public call: an
//! adaptive per-actor rate limiter and a conditional response cache. The
//! downstream handler (the CRUD surface of a content backend) is treated as
//! opaque; the only contract is the axum request/response interface.
//!
//! ## Composition
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use varco::config::{CacheSettings, RateLimitSettings};
//! use varco::infra::http::{EdgeState, apply_edge_pipeline};
//!
//! let upstream = Router::new().route("/api/v1/articles", get(|| async { "[]" }));
//! let state = EdgeState::new(RateLimitSettings::default(), CacheSettings::default());
//! let app = apply_edge_pipeline(upstream, state);
//! # let _ = app;
//! ```
//!
//! Rate limiting runs outermost so rejected calls never invoke the handler
//! or pay for a body fingerprint; the cache stage wraps the handler so it
//! can rewrite the produced response.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
