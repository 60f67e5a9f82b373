use {crate::BlockHash, sqlx::PgConnection};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct Block {
    pub number: i64,
    pub hash: BlockHash,
    pub timestamp: i64,
}

pub async fn insert(ex: &mut PgConnection, block: &Block) -> Result<(), sqlx::Error> {
    const QUERY: &str = "\
        INSERT INTO blocks (number, hash, timestamp) VALUES ($1, $2, $3) \
        ON CONFLICT (number, hash) DO NOTHING;";
    sqlx::query(QUERY)
        .bind(block.number)
        .bind(block.hash)
        .bind(block.timestamp)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn last_indexed_block(ex: &mut PgConnection) -> Result<i64, sqlx::Error> {
    const QUERY: &str = "SELECT COALESCE(MAX(number), 0) FROM blocks;";
    sqlx::query_scalar(QUERY).fetch_one(ex).await
}

/// The most recently indexed blocks, oldest first. Used by the consistency
/// checker to compare local hashes against the canonical chain.
pub async fn most_recent(ex: &mut PgConnection, limit: i64) -> Result<Vec<Block>, sqlx::Error> {
    const QUERY: &str = "\
        SELECT * FROM ( \
            SELECT * FROM blocks ORDER BY number DESC LIMIT $1 \
        ) AS recent ORDER BY number ASC;";
    sqlx::query_as(QUERY).bind(limit).fetch_all(ex).await
}

pub async fn blocks_in_range(
    ex: &mut PgConnection,
    from: i64,
    to: i64,
) -> Result<Vec<Block>, sqlx::Error> {
    const QUERY: &str =
        "SELECT * FROM blocks WHERE number >= $1 AND number <= $2 ORDER BY number ASC;";
    sqlx::query_as(QUERY).bind(from).bind(to).fetch_all(ex).await
}

/// Removes an orphaned block row. The canonical replacement is inserted
/// again by the resync pass.
pub async fn delete(
    ex: &mut PgConnection,
    number: i64,
    hash: BlockHash,
) -> Result<u64, sqlx::Error> {
    const QUERY: &str = "DELETE FROM blocks WHERE number = $1 AND hash = $2;";
    let result = sqlx::query(QUERY).bind(number).bind(hash).execute(ex).await?;
    Ok(result.rows_affected())
}
