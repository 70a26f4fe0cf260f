//! HTTP adapters: the edge middleware stages and their composition.

pub mod cache;
pub mod error;
pub mod middleware;
pub mod rate_limit;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware};

use crate::application::policy::{CachePolicyTable, CacheRule};
use crate::application::quota::{CounterStore, OutagePolicy, QuotaLedger};
use crate::config::{CacheSettings, RateLimitSettings, Settings};
use crate::infra::counters::InMemoryCounterStore;

/// Shared state for the edge stages.
#[derive(Clone)]
pub struct EdgeState {
    pub ledger: QuotaLedger,
    pub rate_limit: RateLimitSettings,
    pub policy: Arc<CachePolicyTable>,
    pub admin_prefix: String,
}

impl EdgeState {
    /// Build edge state over the process-local counter store.
    pub fn new(rate_limit: RateLimitSettings, cache: CacheSettings) -> Self {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        Self::with_store(rate_limit, cache, store)
    }

    /// Build edge state over a caller-supplied counter store, e.g. a
    /// networked one shared by several nodes.
    pub fn with_store(
        rate_limit: RateLimitSettings,
        cache: CacheSettings,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        let outage_policy = if rate_limit.fail_closed {
            OutagePolicy::FailClosed
        } else {
            OutagePolicy::FailOpen
        };
        let policy = Arc::new(CachePolicyTable::new(
            cache
                .rules
                .iter()
                .map(|rule| CacheRule {
                    pattern: rule.pattern.clone(),
                    duration_minutes: rule.duration_minutes,
                })
                .collect(),
            cache.default_minutes.get(),
        ));

        Self {
            ledger: QuotaLedger::new(store, outage_policy),
            rate_limit,
            policy,
            admin_prefix: cache.admin_prefix,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.rate_limit.clone(), settings.cache.clone())
    }
}

/// Wrap `router` in the edge pipeline.
///
/// Layer order is a correctness requirement, not a style choice: rate
/// limiting must run outside the cache stage so rejected calls never invoke
/// the handler or pay for a body fingerprint, and the cache stage must wrap
/// the handler so it can rewrite the produced response. Layers added later
/// run earlier, so the additions below read innermost-first.
pub fn apply_edge_pipeline(router: Router, state: EdgeState) -> Router {
    router
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            cache::response_cache_layer,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state,
            rate_limit::rate_limit_layer,
        ))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
