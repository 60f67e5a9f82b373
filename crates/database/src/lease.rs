use {sqlx::PgConnection, std::time::Duration};

/// Timed mutual-exclusion lease backed by a table row. Unlike a session
/// advisory lock the lease auto-expires, so a crashed holder cannot block
/// repairs forever.
pub async fn try_acquire(
    ex: &mut PgConnection,
    key: &str,
    holder: &str,
    ttl: Duration,
) -> Result<bool, sqlx::Error> {
    // clock_timestamp() instead of now(): the latter is frozen for the
    // duration of a transaction which would make a lease unstealable from
    // within the transaction that created it.
    const QUERY: &str = "\
        INSERT INTO leases (key, holder, expires_at) \
        VALUES ($1, $2, clock_timestamp() + make_interval(secs => $3)) \
        ON CONFLICT (key) DO UPDATE \
        SET holder = $2, expires_at = clock_timestamp() + make_interval(secs => $3) \
        WHERE leases.expires_at < clock_timestamp() OR leases.holder = $2 \
        RETURNING key;";
    let row: Option<String> = sqlx::query_scalar(QUERY)
        .bind(key)
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(ex)
        .await?;
    Ok(row.is_some())
}

pub async fn release(ex: &mut PgConnection, key: &str, holder: &str) -> Result<(), sqlx::Error> {
    const QUERY: &str = "DELETE FROM leases WHERE key = $1 AND holder = $2;";
    sqlx::query(QUERY).bind(key).bind(holder).execute(ex).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::{Connection, PgConnection},
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_lease_excludes_second_holder() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        let ttl = Duration::from_secs(60);
        assert!(try_acquire(&mut db, "reorg", "a", ttl).await.unwrap());
        // Re-acquisition by the holder extends the lease.
        assert!(try_acquire(&mut db, "reorg", "a", ttl).await.unwrap());
        // A competing holder is rejected while the lease is live.
        assert!(!try_acquire(&mut db, "reorg", "b", ttl).await.unwrap());

        release(&mut db, "reorg", "a").await.unwrap();
        assert!(try_acquire(&mut db, "reorg", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_expired_lease_is_stealable() {
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        let mut db = db.begin().await.unwrap();
        crate::clear_DANGER_(&mut db).await.unwrap();

        assert!(try_acquire(&mut db, "reorg", "a", Duration::ZERO)
            .await
            .unwrap());
        assert!(try_acquire(&mut db, "reorg", "b", Duration::from_secs(60))
            .await
            .unwrap());
    }
}
