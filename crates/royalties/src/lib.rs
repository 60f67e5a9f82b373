//! Best-effort royalty and marketplace-fee attribution for persisted
//! fills. A failed or bogus adapter result leaves the fill unenriched; it
//! never blocks fill visibility.

pub mod adapter;

use {
    crate::adapter::{AdapterRegistry, BatchCache},
    alloy_primitives::U256,
    anyhow::Result,
    database::fill_events::RoyaltyUpdate,
    futures::StreamExt,
    model::{
        events::FillEvent,
        royalty::{BPS_DENOMINATOR, RoyaltyResult},
    },
    number::conversions::{u64_to_i64, u256_to_big_decimal},
    sqlx::PgPool,
};

/// Upper bound on simultaneous adapter invocations, protecting upstream
/// RPC and trace-fetch capacity.
pub const MAX_CONCURRENT_ASSIGNMENTS: usize = 50;

pub struct RoyaltyEngine {
    registry: AdapterRegistry,
    pool: PgPool,
}

impl RoyaltyEngine {
    pub fn new(registry: AdapterRegistry, pool: PgPool) -> Self {
        Self { registry, pool }
    }

    /// Runs the adapters over a batch of fills and returns one result per
    /// input fill. Mints, adapter failures and fee totals at or above
    /// 100% all yield `None`.
    pub async fn enrich(&self, fills: &[FillEvent]) -> Vec<Option<RoyaltyResult>> {
        let cache = BatchCache::default();
        futures::stream::iter(fills.iter().map(|fill| {
            let cache = &cache;
            async move {
                if fill.is_mint() {
                    return None;
                }
                let adapter = self.registry.resolve(fill.kind);
                match adapter.assign(fill, cache).await {
                    Ok(result) if result.is_valid() => Some(result),
                    Ok(result) => {
                        tracing::warn!(
                            order_id = ?fill.order_id,
                            total_bps = result.total_bps(),
                            "discarding royalty result violating the fee invariant"
                        );
                        None
                    }
                    Err(err) => {
                        tracing::warn!(
                            ?err,
                            order_id = ?fill.order_id,
                            "royalty adapter failed, fill stays unenriched"
                        );
                        None
                    }
                }
            }
        }))
        .buffered(MAX_CONCURRENT_ASSIGNMENTS)
        .collect()
        .await
    }

    /// Enriches the fills and persists the successful results. Returns
    /// the number of fills that were enriched.
    pub async fn assign(&self, fills: &[FillEvent]) -> Result<usize> {
        let results = self.enrich(fills).await;
        let mut ex = self.pool.acquire().await?;
        let mut enriched = 0;
        for (fill, result) in fills.iter().zip(results) {
            let Some(result) = result else { continue };
            let update = royalty_update(fill, &result);
            enriched += database::fill_events::update_royalties(
                &mut ex,
                database::byte_array::ByteArray(fill.base.tx_hash.0),
                u64_to_i64(fill.base.log_index),
                u64_to_i64(fill.base.batch_index),
                database::byte_array::ByteArray(fill.base.block_hash.0),
                &update,
            )
            .await? as usize;
        }
        Ok(enriched)
    }
}

/// `net_amount = price − price × total_bps / 10000`.
pub fn net_amount(price: U256, total_bps: u32) -> U256 {
    let fees = price * U256::from(total_bps) / U256::from(BPS_DENOMINATOR);
    price - fees
}

fn royalty_update(fill: &FillEvent, result: &RoyaltyResult) -> RoyaltyUpdate {
    RoyaltyUpdate {
        royalty_fee_bps: i32::from(result.royalty_fee_bps),
        marketplace_fee_bps: i32::from(result.marketplace_fee_bps),
        royalty_fee_breakdown: serde_json::to_value(&result.royalty_fee_breakdown)
            .unwrap_or_default(),
        marketplace_fee_breakdown: serde_json::to_value(&result.marketplace_fee_breakdown)
            .unwrap_or_default(),
        paid_full_royalty: result.paid_full_royalty,
        net_amount: u256_to_big_decimal(&net_amount(fill.price, result.total_bps())),
    }
}
