use {
    alloy_primitives::{Address, B256},
    anyhow::Result,
    async_trait::async_trait,
    ethrpc::{CallExecuting, TraceFetching},
    model::order::OrderKind,
    price_oracle::UsdNativePricing,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
};

/// Who gets credited for a fill, resolved from transaction context by an
/// external attribution service.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Attribution {
    pub order_source: Option<String>,
    pub aggregator_source: Option<String>,
    pub fill_source: Option<String>,
    /// The ultimate taker, when the settlement went through a relayer or
    /// aggregator and the log-level taker is just plumbing.
    pub taker: Option<Address>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait AttributionResolving: Send + Sync {
    async fn attribution(
        &self,
        tx_hash: B256,
        kind: OrderKind,
        order_id: Option<String>,
    ) -> Result<Attribution>;
}

/// Attribution resolver that never attributes anything, for setups
/// without the external service.
pub struct NoAttribution;

#[async_trait]
impl AttributionResolving for NoAttribution {
    async fn attribution(
        &self,
        _tx_hash: B256,
        _kind: OrderKind,
        _order_id: Option<String>,
    ) -> Result<Attribution> {
        Ok(Attribution::default())
    }
}

/// Why a matched log produced no canonical event. These are expected
/// outcomes, not errors; they are logged and counted, never thrown.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SkipReason {
    #[error("log payload does not decode")]
    MalformedLog,
    #[error("fill has no resolvable native price")]
    MissingNativePrice,
    #[error("transaction trace unavailable")]
    TraceUnavailable,
    #[error("no matching sub-call in the transaction trace")]
    CallNotFound,
    #[error("required on-chain lookup failed")]
    LookupFailed,
}

/// Occurrence counters for trace sub-call lookups. A fresh instance is
/// created per dispatch and lives exactly as long as that batch, so
/// reprocessing a batch (reorg resync, job retry) starts counting from
/// zero again.
///
/// Keyed by `(tx_hash, exchange, selector)`: repeated identical calls
/// within one transaction resolve to distinct occurrences, while calls
/// through different entry points of the same exchange are ranked
/// independently.
#[derive(Default)]
pub struct CallOccurrences {
    counters: Mutex<HashMap<(B256, Address, [u8; 4]), usize>>,
}

impl CallOccurrences {
    /// Zero-based rank of the next sub-call lookup for this key.
    pub fn next(&self, tx_hash: B256, exchange: Address, selector: [u8; 4]) -> usize {
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry((tx_hash, exchange, selector)).or_default();
        let current = *counter;
        *counter += 1;
        current
    }
}

/// Long-lived collaborators shared by all handlers. Carries no per-batch
/// state; that lives in [`CallOccurrences`].
pub struct HandlerContext {
    pub pricing: Arc<dyn UsdNativePricing>,
    pub traces: Arc<dyn TraceFetching>,
    pub calls: Arc<dyn CallExecuting>,
    pub attribution: Arc<dyn AttributionResolving>,
}

impl HandlerContext {
    pub fn new(
        pricing: Arc<dyn UsdNativePricing>,
        traces: Arc<dyn TraceFetching>,
        calls: Arc<dyn CallExecuting>,
        attribution: Arc<dyn AttributionResolving>,
    ) -> Self {
        Self {
            pricing,
            traces,
            calls,
            attribution,
        }
    }

    pub(crate) fn record_skip(&self, reason: &SkipReason, tx_hash: B256, log_index: Option<u64>) {
        tracing::debug!(%reason, ?tx_hash, log_index, "skipping matched log");
        let label = match reason {
            SkipReason::MalformedLog => "malformed_log",
            SkipReason::MissingNativePrice => "missing_native_price",
            SkipReason::TraceUnavailable => "trace_unavailable",
            SkipReason::CallNotFound => "call_not_found",
            SkipReason::LookupFailed => "lookup_failed",
        };
        crate::metrics::Metrics::get()
            .logs_skipped
            .with_label_values(&[label])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrence_ranks_count_per_transaction_exchange_and_selector() {
        let occurrences = CallOccurrences::default();

        let tx = B256::repeat_byte(1);
        let pool = Address::with_last_byte(1);
        let buy = [1, 2, 3, 4];
        let sell = [5, 6, 7, 8];
        assert_eq!(occurrences.next(tx, pool, buy), 0);
        assert_eq!(occurrences.next(tx, pool, buy), 1);
        // A different entry point of the same pool is ranked on its own.
        assert_eq!(occurrences.next(tx, pool, sell), 0);
        assert_eq!(occurrences.next(tx, Address::with_last_byte(2), buy), 0);
        assert_eq!(occurrences.next(B256::repeat_byte(2), pool, buy), 0);
    }

    #[test]
    fn fresh_instances_start_from_zero() {
        let tx = B256::repeat_byte(1);
        let pool = Address::with_last_byte(1);
        let selector = [1, 2, 3, 4];

        let occurrences = CallOccurrences::default();
        assert_eq!(occurrences.next(tx, pool, selector), 0);
        assert_eq!(occurrences.next(tx, pool, selector), 1);

        // Reprocessing a batch gets a fresh instance and fresh ranks.
        let occurrences = CallOccurrences::default();
        assert_eq!(occurrences.next(tx, pool, selector), 0);
    }
}
