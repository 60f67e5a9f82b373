//! Writes one batch of canonical data in a single transaction. Fill
//! inserts and the referenced orders' state transitions are single
//! statements (see the database crate), so there is no window where a
//! fill is visible without its order update or vice versa.

use {
    crate::accumulator::OnChainData,
    alloy_primitives::{Address, B256},
    anyhow::Result,
    database::{byte_array::ByteArray, cancel_events, fill_events, orders},
    model::events::{BulkCancelEvent, CancelEvent, FillEvent, OnChainOrderInfo},
    number::conversions::{u64_to_i64, u256_to_big_decimal},
    sqlx::PgPool,
};

pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persists the batch atomically. Safe to re-run with the same input:
    /// every insert is keyed by the event's natural log key.
    pub async fn persist(&self, data: &OnChainData) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Orders discovered on-chain must exist before their fills
        // reconcile against them.
        for order in &data.orders {
            orders::insert(&mut tx, &order_row(order)).await?;
        }
        for fill in &data.fills {
            let row = fill_row(fill);
            match &fill.order_id {
                Some(_) => fill_events::insert_filling_order(&mut tx, &row).await?,
                None => fill_events::insert(&mut tx, &row).await?,
            }
        }
        for fill in &data.partial_fills {
            let row = fill_row(fill);
            match &fill.order_id {
                Some(_) => fill_events::insert_decrementing_order(&mut tx, &row).await?,
                None => fill_events::insert(&mut tx, &row).await?,
            }
        }
        for fill in &data.matched_fills {
            let row = fill_row(fill);
            match &fill.order_id {
                Some(_) => fill_events::insert_matching_order(&mut tx, &row).await?,
                None => fill_events::insert(&mut tx, &row).await?,
            }
        }
        for cancel in &data.cancels {
            cancel_events::insert_cancelling_order(&mut tx, &cancel_row(cancel)).await?;
        }
        for bulk in &data.bulk_cancels {
            cancel_events::insert_bulk(&mut tx, &bulk_cancel_row(bulk)).await?;
        }

        tx.commit().await?;

        crate::metrics::Metrics::get()
            .fills_indexed
            .inc_by(data.all_fills().count() as u64);
        Ok(())
    }
}

fn db_address(address: Address) -> database::Address {
    ByteArray(address.0.0)
}

fn db_hash(hash: B256) -> database::TransactionHash {
    ByteArray(hash.0)
}

fn fill_row(fill: &FillEvent) -> fill_events::Fill {
    fill_events::Fill {
        order_kind: fill.kind.to_string(),
        order_id: fill.order_id.clone(),
        order_side: fill.side.to_string(),
        maker: db_address(fill.maker),
        taker: db_address(fill.taker),
        contract: db_address(fill.contract),
        token_id: u256_to_big_decimal(&fill.token_id),
        amount: u256_to_big_decimal(&fill.amount),
        currency: db_address(fill.currency),
        currency_price: u256_to_big_decimal(&fill.currency_price),
        price: u256_to_big_decimal(&fill.price),
        usd_price: fill.usd_price.as_ref().map(u256_to_big_decimal),
        royalty_fee_bps: fill.royalty_fee_bps.map(i32::from),
        marketplace_fee_bps: fill.marketplace_fee_bps.map(i32::from),
        royalty_fee_breakdown: (!fill.royalty_fee_breakdown.is_empty())
            .then(|| serde_json::to_value(&fill.royalty_fee_breakdown).unwrap_or_default()),
        marketplace_fee_breakdown: (!fill.marketplace_fee_breakdown.is_empty())
            .then(|| serde_json::to_value(&fill.marketplace_fee_breakdown).unwrap_or_default()),
        paid_full_royalty: fill.paid_full_royalty,
        net_amount: fill.net_amount.as_ref().map(u256_to_big_decimal),
        is_deleted: fill.is_deleted,
        address: db_address(fill.base.address),
        block_number: u64_to_i64(fill.base.block),
        block_hash: db_hash(fill.base.block_hash),
        tx_hash: db_hash(fill.base.tx_hash),
        tx_index: u64_to_i64(fill.base.tx_index),
        log_index: u64_to_i64(fill.base.log_index),
        batch_index: u64_to_i64(fill.base.batch_index),
        timestamp: u64_to_i64(fill.base.timestamp),
    }
}

fn cancel_row(cancel: &CancelEvent) -> cancel_events::Cancel {
    cancel_events::Cancel {
        order_kind: cancel.kind.to_string(),
        order_id: cancel.order_id.clone(),
        maker: db_address(cancel.maker),
        is_deleted: false,
        address: db_address(cancel.base.address),
        block_number: u64_to_i64(cancel.base.block),
        block_hash: db_hash(cancel.base.block_hash),
        tx_hash: db_hash(cancel.base.tx_hash),
        tx_index: u64_to_i64(cancel.base.tx_index),
        log_index: u64_to_i64(cancel.base.log_index),
        batch_index: u64_to_i64(cancel.base.batch_index),
        timestamp: u64_to_i64(cancel.base.timestamp),
    }
}

fn bulk_cancel_row(bulk: &BulkCancelEvent) -> cancel_events::BulkCancel {
    cancel_events::BulkCancel {
        order_kind: bulk.kind.to_string(),
        maker: db_address(bulk.maker),
        min_nonce: u256_to_big_decimal(&bulk.min_nonce),
        is_deleted: false,
        address: db_address(bulk.base.address),
        block_number: u64_to_i64(bulk.base.block),
        block_hash: db_hash(bulk.base.block_hash),
        tx_hash: db_hash(bulk.base.tx_hash),
        tx_index: u64_to_i64(bulk.base.tx_index),
        log_index: u64_to_i64(bulk.base.log_index),
        batch_index: u64_to_i64(bulk.base.batch_index),
        timestamp: u64_to_i64(bulk.base.timestamp),
    }
}

fn order_row(info: &OnChainOrderInfo) -> orders::Order {
    orders::Order {
        id: info.id.clone(),
        kind: info.kind.to_string(),
        fillability_status: "fillable".to_string(),
        quantity_filled: 0.into(),
        quantity_remaining: u256_to_big_decimal(&info.amount),
        valid_from: u64_to_i64(info.valid_from),
        valid_until: u64_to_i64(info.valid_until),
        block_number: 0,
        log_index: 0,
        source: info.source.clone(),
        data: serde_json::to_value(info).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        alloy_primitives::U256,
        model::{
            NATIVE_CURRENCY,
            events::{BaseEventParams, OrderSide},
            order::OrderKind,
        },
        sqlx::Connection,
    };

    fn base(log_index: u64) -> BaseEventParams {
        BaseEventParams {
            address: Address::with_last_byte(0xee),
            block: 100,
            block_hash: B256::repeat_byte(0xbb),
            tx_hash: B256::repeat_byte(0xcc),
            tx_index: 3,
            log_index,
            batch_index: 1,
            timestamp: 1_700_000_000,
        }
    }

    /// The maker lists an ERC-721 for 1.5 native units and it sells in
    /// full: exactly one fill row appears and the order flips to filled.
    #[tokio::test]
    #[ignore]
    async fn postgres_listing_fill_round_trip() {
        const PRICE: u128 = 1_500_000_000_000_000_000;

        let pool = PgPool::connect("postgresql://").await.unwrap();
        let store = EventStore::new(pool.clone());
        let mut ex = pool.acquire().await.unwrap();
        let mut cleanup = ex.begin().await.unwrap();
        database::clear_DANGER_(&mut cleanup).await.unwrap();
        cleanup.commit().await.unwrap();

        orders::insert(
            &mut ex,
            &orders::Order {
                id: "listing".to_string(),
                kind: "order-book".to_string(),
                fillability_status: "fillable".to_string(),
                quantity_filled: 0.into(),
                quantity_remaining: 1.into(),
                valid_from: 0,
                valid_until: i64::MAX,
                block_number: 0,
                log_index: 0,
                source: None,
                data: serde_json::Value::Null,
            },
        )
        .await
        .unwrap();

        let fill = FillEvent {
            kind: OrderKind::OrderBook,
            order_id: Some("listing".to_string()),
            side: OrderSide::Sell,
            maker: Address::with_last_byte(1),
            taker: Address::with_last_byte(2),
            contract: Address::with_last_byte(7),
            token_id: U256::from(42),
            amount: U256::from(1),
            currency: NATIVE_CURRENCY,
            currency_price: U256::from(PRICE),
            price: U256::from(PRICE),
            usd_price: Some(U256::from(2_775_000_000u64)),
            base: base(0),
            ..Default::default()
        };
        let data = OnChainData {
            partial_fills: vec![fill],
            ..Default::default()
        };

        // Redelivery of the same batch must be a no-op.
        store.persist(&data).await.unwrap();
        store.persist(&data).await.unwrap();

        let fills = fill_events::active_fills_in_block(&mut ex, 100)
            .await
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, u256_to_big_decimal(&U256::from(PRICE)));

        let order = orders::single_order(&mut ex, "listing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.fillability_status, "filled");
        assert_eq!(order.quantity_remaining, 0.into());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_cancel_and_bulk_cancel_persist() {
        let pool = PgPool::connect("postgresql://").await.unwrap();
        let store = EventStore::new(pool.clone());
        let mut ex = pool.acquire().await.unwrap();
        let mut cleanup = ex.begin().await.unwrap();
        database::clear_DANGER_(&mut cleanup).await.unwrap();
        cleanup.commit().await.unwrap();

        let data = OnChainData {
            cancels: vec![CancelEvent {
                kind: OrderKind::OrderBook,
                order_id: "listing".to_string(),
                maker: Address::with_last_byte(1),
                base: base(0),
            }],
            bulk_cancels: vec![BulkCancelEvent {
                kind: OrderKind::OrderBook,
                maker: Address::with_last_byte(1),
                min_nonce: U256::from(7),
                base: base(1),
            }],
            ..Default::default()
        };
        store.persist(&data).await.unwrap();

        assert!(
            cancel_events::is_cancelled(&mut ex, "listing")
                .await
                .unwrap()
        );
        let nonce = cancel_events::min_nonce(
            &mut ex,
            db_address(Address::with_last_byte(1)),
            "order-book",
        )
        .await
        .unwrap();
        assert_eq!(nonce, 7.into());
    }
}
