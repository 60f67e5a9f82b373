//! Detects blocks whose locally stored hash no longer matches the
//! canonical chain, soft-deletes their events and reports the ranges that
//! need re-synchronization. Repair of a block is not reentrant, so a
//! checker only runs while holding a timed mutual-exclusion lease.

use {
    crate::metrics::Metrics,
    anyhow::{Context, Result},
    database::{blocks, cancel_events, fill_events, lease},
    ethrpc::{BlockRetrieving, RangeInclusive},
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
};

const LEASE_KEY: &str = "block-consistency";

pub struct BlockConsistencyChecker {
    pool: PgPool,
    retriever: Arc<dyn BlockRetrieving>,
    /// How many of the most recent local blocks are re-verified per run.
    depth: u64,
    lease_ttl: Duration,
    /// Identifies this detector instance for the lease.
    holder: String,
}

impl BlockConsistencyChecker {
    pub fn new(
        pool: PgPool,
        retriever: Arc<dyn BlockRetrieving>,
        depth: u64,
        lease_ttl: Duration,
        holder: String,
    ) -> Self {
        Self {
            pool,
            retriever,
            depth,
            lease_ttl,
            holder,
        }
    }

    /// Compares the stored recent blocks against the canonical chain.
    /// Orphaned blocks get their fills and cancellations flagged deleted
    /// and their block row removed; the affected block numbers are
    /// returned as ranges for the indexer to re-dispatch.
    ///
    /// When another detector holds the lease this returns empty without
    /// doing anything.
    pub async fn verify(&self) -> Result<Vec<RangeInclusive<u64>>> {
        let mut ex = self.pool.acquire().await?;
        if !lease::try_acquire(&mut ex, LEASE_KEY, &self.holder, self.lease_ttl).await? {
            tracing::debug!("another consistency checker holds the lease");
            return Ok(vec![]);
        }
        let result = self.verify_inner().await;
        // Best effort: an expired lease is stealable anyway.
        if let Err(err) = lease::release(&mut ex, LEASE_KEY, &self.holder).await {
            tracing::warn!(?err, "failed to release consistency lease");
        }
        result
    }

    async fn verify_inner(&self) -> Result<Vec<RangeInclusive<u64>>> {
        let stored = {
            let mut ex = self.pool.acquire().await?;
            blocks::most_recent(&mut ex, i64::try_from(self.depth).unwrap_or(i64::MAX)).await?
        };

        let mut orphaned = Vec::new();
        for block in stored {
            let number = u64::try_from(block.number).context("negative block number")?;
            let canonical = self.retriever.block(number).await?;
            if canonical.hash.0 == block.hash.0 {
                continue;
            }
            tracing::warn!(
                number,
                stored = ?block.hash,
                canonical = ?canonical.hash,
                "orphaned block, soft-deleting its events"
            );

            let mut tx = self.pool.begin().await?;
            fill_events::mark_deleted_by_block(&mut tx, block.number, block.hash).await?;
            cancel_events::mark_deleted_by_block(&mut tx, block.number, block.hash).await?;
            blocks::delete(&mut tx, block.number, block.hash).await?;
            tx.commit().await?;

            Metrics::get().blocks_reorged.inc();
            orphaned.push(number);
        }
        Ok(merge_into_ranges(orphaned))
    }
}

/// Collapses block numbers into maximal consecutive ranges.
fn merge_into_ranges(mut numbers: Vec<u64>) -> Vec<RangeInclusive<u64>> {
    numbers.sort_unstable();
    numbers.dedup();
    let mut ranges: Vec<(u64, u64)> = Vec::new();
    for number in numbers {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == number => *end = number,
            _ => ranges.push((number, number)),
        }
    }
    ranges
        .into_iter()
        .map(|(start, end)| RangeInclusive::try_new(start, end).unwrap())
        .collect()
}
