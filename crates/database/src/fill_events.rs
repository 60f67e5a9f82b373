use {
    crate::{Address, BlockHash, TransactionHash},
    bigdecimal::BigDecimal,
    const_format::concatcp,
    sqlx::PgConnection,
};

/// A fill row. The natural key is `(tx_hash, log_index, batch_index,
/// block_hash)` so that redelivered logs deduplicate and reorged blocks
/// can coexist with their replacements.
#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct Fill {
    pub order_kind: String,
    pub order_id: Option<String>,
    pub order_side: String,
    pub maker: Address,
    pub taker: Address,
    pub contract: Address,
    pub token_id: BigDecimal,
    pub amount: BigDecimal,
    pub currency: Address,
    pub currency_price: BigDecimal,
    pub price: BigDecimal,
    pub usd_price: Option<BigDecimal>,
    pub royalty_fee_bps: Option<i32>,
    pub marketplace_fee_bps: Option<i32>,
    pub royalty_fee_breakdown: Option<serde_json::Value>,
    pub marketplace_fee_breakdown: Option<serde_json::Value>,
    pub paid_full_royalty: Option<bool>,
    pub net_amount: Option<BigDecimal>,
    pub is_deleted: bool,
    pub address: Address,
    pub block_number: i64,
    pub block_hash: BlockHash,
    pub tx_hash: TransactionHash,
    pub tx_index: i64,
    pub log_index: i64,
    pub batch_index: i64,
    pub timestamp: i64,
}

const INSERT: &str = "\
    INSERT INTO fill_events (order_kind, order_id, order_side, maker, taker, contract, token_id, \
     amount, currency, currency_price, price, usd_price, royalty_fee_bps, marketplace_fee_bps, \
     royalty_fee_breakdown, marketplace_fee_breakdown, paid_full_royalty, net_amount, is_deleted, \
     address, block_number, block_hash, tx_hash, tx_index, log_index, batch_index, timestamp) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
     $19, $20, $21, $22, $23, $24, $25, $26, $27) \
    ON CONFLICT (tx_hash, log_index, batch_index, block_hash) DO NOTHING";

fn bind_fill<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    fill: &'q Fill,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&fill.order_kind)
        .bind(&fill.order_id)
        .bind(&fill.order_side)
        .bind(fill.maker)
        .bind(fill.taker)
        .bind(fill.contract)
        .bind(&fill.token_id)
        .bind(&fill.amount)
        .bind(fill.currency)
        .bind(&fill.currency_price)
        .bind(&fill.price)
        .bind(&fill.usd_price)
        .bind(fill.royalty_fee_bps)
        .bind(fill.marketplace_fee_bps)
        .bind(&fill.royalty_fee_breakdown)
        .bind(&fill.marketplace_fee_breakdown)
        .bind(fill.paid_full_royalty)
        .bind(&fill.net_amount)
        .bind(fill.is_deleted)
        .bind(fill.address)
        .bind(fill.block_number)
        .bind(fill.block_hash)
        .bind(fill.tx_hash)
        .bind(fill.tx_index)
        .bind(fill.log_index)
        .bind(fill.batch_index)
        .bind(fill.timestamp)
}

/// Inserts the fill without touching any order. Used for fills that do not
/// reference a known order (e.g. mints).
pub async fn insert(ex: &mut PgConnection, fill: &Fill) -> Result<(), sqlx::Error> {
    bind_fill(sqlx::query(concatcp!(INSERT, ";")), fill)
        .execute(ex)
        .await?;
    Ok(())
}

/// Inserts the fill and marks the referenced order fully filled in the
/// same statement. Duplicate delivery of the same log is a no-op: the
/// insert conflicts, the CTE yields no rows and the order is untouched.
pub async fn insert_filling_order(ex: &mut PgConnection, fill: &Fill) -> Result<(), sqlx::Error> {
    const QUERY: &str = concatcp!(
        "WITH fill AS (",
        INSERT,
        " RETURNING order_id, timestamp) \
        UPDATE orders SET \
            fillability_status = 'filled', \
            quantity_filled = orders.quantity_filled + orders.quantity_remaining, \
            quantity_remaining = 0, \
            valid_until = fill.timestamp, \
            block_number = $21, \
            log_index = $25 \
        FROM fill \
        WHERE orders.id = fill.order_id;",
    );
    bind_fill(sqlx::query(QUERY), fill).execute(ex).await?;
    Ok(())
}

/// Inserts the fill and decrements the referenced order's remaining
/// quantity, flipping the status to filled once it reaches zero. The
/// `quantity_remaining > 0` guard makes late or duplicate deliveries
/// unable to double-decrement.
pub async fn insert_decrementing_order(
    ex: &mut PgConnection,
    fill: &Fill,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = concatcp!(
        "WITH fill AS (",
        INSERT,
        " RETURNING order_id, amount, timestamp) \
        UPDATE orders SET \
            fillability_status = CASE \
                WHEN orders.quantity_remaining - fill.amount <= 0 THEN 'filled' \
                ELSE orders.fillability_status END, \
            quantity_filled = orders.quantity_filled + LEAST(fill.amount, orders.quantity_remaining), \
            quantity_remaining = GREATEST(orders.quantity_remaining - fill.amount, 0), \
            valid_until = CASE \
                WHEN orders.quantity_remaining - fill.amount <= 0 THEN fill.timestamp \
                ELSE orders.valid_until END, \
            block_number = $21, \
            log_index = $25 \
        FROM fill \
        WHERE orders.id = fill.order_id AND orders.quantity_remaining > 0;",
    );
    bind_fill(sqlx::query(QUERY), fill).execute(ex).await?;
    Ok(())
}

/// Inserts the fill and updates the order only if the event is causally
/// newer than the order's current chain position. Used when the order id
/// is only discovered after the fact (trace inspection): last writer wins
/// by chain order, not by arrival order.
pub async fn insert_matching_order(ex: &mut PgConnection, fill: &Fill) -> Result<(), sqlx::Error> {
    const QUERY: &str = concatcp!(
        "WITH fill AS (",
        INSERT,
        " RETURNING order_id, timestamp) \
        UPDATE orders SET \
            fillability_status = 'filled', \
            quantity_filled = orders.quantity_filled + orders.quantity_remaining, \
            quantity_remaining = 0, \
            valid_until = fill.timestamp, \
            block_number = $21, \
            log_index = $25 \
        FROM fill \
        WHERE orders.id = fill.order_id \
            AND (orders.block_number, orders.log_index) < ($21, $25) \
            AND orders.valid_from <= fill.timestamp;",
    );
    bind_fill(sqlx::query(QUERY), fill).execute(ex).await?;
    Ok(())
}

/// Attaches royalty data to a fill. The `royalty_fee_bps IS NULL` guard
/// makes enrichment at-most-once.
pub struct RoyaltyUpdate {
    pub royalty_fee_bps: i32,
    pub marketplace_fee_bps: i32,
    pub royalty_fee_breakdown: serde_json::Value,
    pub marketplace_fee_breakdown: serde_json::Value,
    pub paid_full_royalty: bool,
    pub net_amount: BigDecimal,
}

pub async fn update_royalties(
    ex: &mut PgConnection,
    tx_hash: TransactionHash,
    log_index: i64,
    batch_index: i64,
    block_hash: BlockHash,
    update: &RoyaltyUpdate,
) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "\
        UPDATE fill_events SET \
            royalty_fee_bps = $1, \
            marketplace_fee_bps = $2, \
            royalty_fee_breakdown = $3, \
            marketplace_fee_breakdown = $4, \
            paid_full_royalty = $5, \
            net_amount = $6 \
        WHERE tx_hash = $7 AND log_index = $8 AND batch_index = $9 AND block_hash = $10 \
            AND royalty_fee_bps IS NULL;";
    let result = sqlx::query(QUERY)
        .bind(update.royalty_fee_bps)
        .bind(update.marketplace_fee_bps)
        .bind(&update.royalty_fee_breakdown)
        .bind(&update.marketplace_fee_breakdown)
        .bind(update.paid_full_royalty)
        .bind(&update.net_amount)
        .bind(tx_hash)
        .bind(log_index)
        .bind(batch_index)
        .bind(block_hash)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

/// Reorg repair: flags every fill of the orphaned block as deleted. Rows
/// are never hard-deleted so the audit history survives. The associated
/// orders are deliberately left untouched because their prior status
/// cannot be reconstructed reliably.
pub async fn mark_deleted_by_block(
    ex: &mut PgConnection,
    block_number: i64,
    block_hash: BlockHash,
) -> Result<u64, sqlx::Error> {
    const QUERY: &str =
        "UPDATE fill_events SET is_deleted = true WHERE block_number = $1 AND block_hash = $2;";
    let result = sqlx::query(QUERY)
        .bind(block_number)
        .bind(block_hash)
        .execute(ex)
        .await?;
    Ok(result.rows_affected())
}

pub async fn fill(
    ex: &mut PgConnection,
    tx_hash: TransactionHash,
    log_index: i64,
    batch_index: i64,
    block_hash: BlockHash,
) -> Result<Option<Fill>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT * FROM fill_events \
        WHERE tx_hash = $1 AND log_index = $2 AND batch_index = $3 AND block_hash = $4;";
    sqlx::query_as(QUERY)
        .bind(tx_hash)
        .bind(log_index)
        .bind(batch_index)
        .bind(block_hash)
        .fetch_optional(ex)
        .await
}

/// Fills of a block that are still part of the canonical history.
pub async fn active_fills_in_block(
    ex: &mut PgConnection,
    block_number: i64,
) -> Result<Vec<Fill>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT * FROM fill_events \
        WHERE block_number = $1 AND NOT is_deleted \
        ORDER BY log_index, batch_index;";
    sqlx::query_as(QUERY)
        .bind(block_number)
        .fetch_all(ex)
        .await
}
