use {
    crate::{Address, BlockHash, TransactionHash},
    bigdecimal::BigDecimal,
    const_format::concatcp,
    sqlx::PgConnection,
};

#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct Cancel {
    pub order_kind: String,
    pub order_id: String,
    pub maker: Address,
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

/// Cancellation-by-nonce: every order by `maker` with a nonce below
/// `min_nonce` is implicitly dead. Affected orders are detected lazily by
/// the validity checker through [`min_nonce`], never by a fan-out write.
#[derive(Clone, Debug, Default, PartialEq, sqlx::FromRow)]
pub struct BulkCancel {
    pub order_kind: String,
    pub maker: Address,
    pub min_nonce: BigDecimal,
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

const INSERT_CANCEL: &str = "\
    INSERT INTO cancel_events (order_kind, order_id, maker, is_deleted, address, block_number, \
     block_hash, tx_hash, tx_index, log_index, batch_index, timestamp) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
    ON CONFLICT (tx_hash, log_index, batch_index, block_hash) DO NOTHING";

/// Inserts the cancellation and moves the referenced order to `cancelled`
/// in the same statement, unless the order already reached a terminal
/// state (status transitions are monotone).
pub async fn insert_cancelling_order(
    ex: &mut PgConnection,
    cancel: &Cancel,
) -> Result<(), sqlx::Error> {
    const QUERY: &str = concatcp!(
        "WITH cancel AS (",
        INSERT_CANCEL,
        " RETURNING order_id) \
        UPDATE orders SET \
            fillability_status = 'cancelled', \
            block_number = $6, \
            log_index = $10 \
        FROM cancel \
        WHERE orders.id = cancel.order_id \
            AND orders.fillability_status NOT IN ('filled', 'cancelled');",
    );
    sqlx::query(QUERY)
        .bind(&cancel.order_kind)
        .bind(&cancel.order_id)
        .bind(cancel.maker)
        .bind(cancel.is_deleted)
        .bind(cancel.address)
        .bind(cancel.block_number)
        .bind(cancel.block_hash)
        .bind(cancel.tx_hash)
        .bind(cancel.tx_index)
        .bind(cancel.log_index)
        .bind(cancel.batch_index)
        .bind(cancel.timestamp)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn insert_bulk(ex: &mut PgConnection, event: &BulkCancel) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO bulk_cancel_events (order_kind, maker, min_nonce, is_deleted, address, \
         block_number, block_hash, tx_hash, tx_index, log_index, batch_index, timestamp) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
        ON CONFLICT (tx_hash, log_index, batch_index, block_hash) DO NOTHING;";
    sqlx::query(QUERY)
        .bind(&event.order_kind)
        .bind(event.maker)
        .bind(&event.min_nonce)
        .bind(event.is_deleted)
        .bind(event.address)
        .bind(event.block_number)
        .bind(event.block_hash)
        .bind(event.tx_hash)
        .bind(event.tx_index)
        .bind(event.log_index)
        .bind(event.batch_index)
        .bind(event.timestamp)
        .execute(ex)
        .await?;
    Ok(())
}

/// The maker's current minimum valid nonce for the given order kind.
pub async fn min_nonce(
    ex: &mut PgConnection,
    maker: Address,
    order_kind: &str,
) -> Result<BigDecimal, sqlx::Error> {
    const QUERY: &str = "\
        SELECT COALESCE(MAX(min_nonce), 0) FROM bulk_cancel_events \
        WHERE maker = $1 AND order_kind = $2 AND NOT is_deleted;";
    sqlx::query_scalar(QUERY)
        .bind(maker)
        .bind(order_kind)
        .fetch_one(ex)
        .await
}

pub async fn is_cancelled(ex: &mut PgConnection, order_id: &str) -> Result<bool, sqlx::Error> {
    const QUERY: &str =
        "SELECT EXISTS (SELECT 1 FROM cancel_events WHERE order_id = $1 AND NOT is_deleted);";
    sqlx::query_scalar(QUERY).bind(order_id).fetch_one(ex).await
}

pub async fn mark_deleted_by_block(
    ex: &mut crate::PgTransaction<'_>,
    block_number: i64,
    block_hash: BlockHash,
) -> Result<u64, sqlx::Error> {
    const QUERY_CANCELS: &str =
        "UPDATE cancel_events SET is_deleted = true WHERE block_number = $1 AND block_hash = $2;";
    let cancels = sqlx::query(QUERY_CANCELS)
        .bind(block_number)
        .bind(block_hash)
        .execute(&mut **ex)
        .await?;

    const QUERY_BULK: &str = "\
        UPDATE bulk_cancel_events SET is_deleted = true \
        WHERE block_number = $1 AND block_hash = $2;";
    let bulk = sqlx::query(QUERY_BULK)
        .bind(block_number)
        .bind(block_hash)
        .execute(&mut **ex)
        .await?;

    Ok(cancels.rows_affected() + bulk.rows_affected())
}
