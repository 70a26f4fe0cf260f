//! Time-windowed admission control over a shared counter store.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

const METRIC_STORE_FAILURE: &str = "varco_quota_store_failure_total";

/// Raised when the shared counter store cannot be reached. Resolved locally
/// by the configured [`OutagePolicy`]; callers never see it as a distinct
/// error.
#[derive(Debug, Error)]
#[error("counter store unavailable: {message}")]
pub struct CounterStoreError {
    message: String,
}

impl CounterStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Post-increment view of one fixed window.
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    /// Calls recorded in the current window, including this one.
    pub count: u64,
    /// Time until the current window expires.
    pub reset_in: Duration,
}

/// Atomic per-key counter with fixed-window expiry.
///
/// Implementations must perform the expiry check and increment as one
/// indivisible operation per key; a separate read-compare-write sequence
/// over-admits under concurrent calls for the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, CounterStoreError>;
}

/// What to do with a call while the counter store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutagePolicy {
    /// Admit the call. A storage outage should not become a total API
    /// outage.
    FailOpen,
    /// Reject the call.
    FailClosed,
}

impl fmt::Display for OutagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutagePolicy::FailOpen => f.write_str("fail-open"),
            OutagePolicy::FailClosed => f.write_str("fail-closed"),
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy)]
pub struct AdmitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

/// Admission control ledger. All counter state lives behind the
/// [`CounterStore`] port; nothing else in the crate mutates it.
///
/// Windows are fixed: the first call for a key opens a window and the
/// counter resets on the first call observed after expiry. Up to twice the
/// limit can pass across a window boundary; callers that need smoother
/// shaping can put a token-bucket store behind the same port.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn CounterStore>,
    outage_policy: OutagePolicy,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn CounterStore>, outage_policy: OutagePolicy) -> Self {
        Self {
            store,
            outage_policy,
        }
    }

    /// Record one call for `key` and decide whether it is within budget.
    ///
    /// The call is admitted only if the pre-increment count was below
    /// `limit`. Quota is consumed even when the caller later abandons the
    /// request; refunds would let retry storms reset their own budget.
    pub async fn admit(&self, key: &str, limit: u32, window: Duration) -> AdmitDecision {
        match self.store.increment(key, window).await {
            Ok(window_count) => {
                let allowed = window_count.count <= u64::from(limit);
                let remaining = u64::from(limit).saturating_sub(window_count.count) as u32;
                AdmitDecision {
                    allowed,
                    limit,
                    remaining,
                    reset_in: window_count.reset_in,
                }
            }
            Err(err) => {
                counter!(METRIC_STORE_FAILURE).increment(1);
                let allowed = self.outage_policy == OutagePolicy::FailOpen;
                warn!(
                    target = "varco::quota",
                    error = %err,
                    policy = %self.outage_policy,
                    "counter store unreachable, applying outage policy"
                );
                AdmitDecision {
                    allowed,
                    limit,
                    remaining: if allowed { limit } else { 0 },
                    reset_in: window,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedStore {
        count: AtomicU64,
    }

    impl ScriptedStore {
        fn new() -> Self {
            Self {
                count: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl CounterStore for ScriptedStore {
        async fn increment(
            &self,
            _key: &str,
            window: Duration,
        ) -> Result<WindowCount, CounterStoreError> {
            Ok(WindowCount {
                count: self.count.fetch_add(1, Ordering::SeqCst) + 1,
                reset_in: window,
            })
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn increment(
            &self,
            _key: &str,
            _window: Duration,
        ) -> Result<WindowCount, CounterStoreError> {
            Err(CounterStoreError::new("connection refused"))
        }
    }

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn remaining_counts_down_to_zero_at_the_limit() {
        let ledger = QuotaLedger::new(Arc::new(ScriptedStore::new()), OutagePolicy::FailOpen);

        for expected_remaining in (0..3).rev() {
            let decision = ledger.admit("guest:ip:fp", 3, WINDOW).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = ledger.admit("guest:ip:fp", 3, WINDOW).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.limit, 3);
    }

    #[tokio::test]
    async fn outage_fails_open_by_default_policy() {
        let ledger = QuotaLedger::new(Arc::new(UnreachableStore), OutagePolicy::FailOpen);

        let decision = ledger.admit("guest:ip:fp", 10, WINDOW).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert_eq!(decision.reset_in, WINDOW);
    }

    #[tokio::test]
    async fn outage_fails_closed_when_configured() {
        let ledger = QuotaLedger::new(Arc::new(UnreachableStore), OutagePolicy::FailClosed);

        let decision = ledger.admit("guest:ip:fp", 10, WINDOW).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }
}
