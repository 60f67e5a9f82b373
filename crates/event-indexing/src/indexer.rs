//! The ingestion pipeline: walks the chain from the last locally indexed
//! block in bounded windows, funnels matched logs through the protocol
//! handlers and hands the canonical result to the store.

use {
    crate::{
        context::HandlerContext,
        handlers::HandlerRegistry,
        maintenance::Maintaining,
        store::EventStore,
    },
    anyhow::{Context as _, Result},
    async_trait::async_trait,
    database::{blocks, byte_array::ByteArray},
    ethrpc::{BlockRetrieving, LogFilter, LogRetrieving, RangeInclusive},
    number::conversions::u64_to_i64,
    royalties::RoyaltyEngine,
    std::{collections::HashMap, sync::Arc},
};

/// We expect that there is never a reorg that changes more than the last
/// n blocks.
pub const MAX_REORG_BLOCK_COUNT: u64 = 64;
/// Upper bound on the width of one `eth_getLogs` window.
const MAX_BLOCKS_QUERIED: u64 = 2 * MAX_REORG_BLOCK_COUNT;

pub struct EventIndexer {
    blocks: Arc<dyn BlockRetrieving>,
    logs: Arc<dyn LogRetrieving>,
    registry: HandlerRegistry,
    ctx: HandlerContext,
    store: EventStore,
    /// Post-persist enrichment; absent in setups without royalty
    /// support.
    royalties: Option<Arc<RoyaltyEngine>>,
}

impl EventIndexer {
    pub fn new(
        blocks: Arc<dyn BlockRetrieving>,
        logs: Arc<dyn LogRetrieving>,
        registry: HandlerRegistry,
        ctx: HandlerContext,
        store: EventStore,
        royalties: Option<Arc<RoyaltyEngine>>,
    ) -> Self {
        Self {
            blocks,
            logs,
            registry,
            ctx,
            store,
            royalties,
        }
    }

    /// Indexes everything between the last locally indexed block and the
    /// current chain head.
    pub async fn update_events(&self) -> Result<()> {
        let last = {
            let mut ex = self.store.pool().acquire().await?;
            blocks::last_indexed_block(&mut ex).await?
        };
        let last = u64::try_from(last).context("negative block number")?;
        let current = self.blocks.current_block().await?.number;
        if current <= last {
            return Ok(());
        }

        for (from, to) in windows(last + 1, current) {
            self.index_range(RangeInclusive::try_new(from, to)?).await?;
        }
        Ok(())
    }

    /// Fetches, matches, dispatches and persists the logs of one block
    /// range. Reprocessing the same range is idempotent, so this is also
    /// the entry point for reorg resynchronization.
    pub async fn index_range(&self, range: RangeInclusive<u64>) -> Result<()> {
        let headers = self.blocks.blocks(range.clone()).await?;
        let filter = LogFilter {
            from_block: *range.start(),
            to_block: *range.end(),
            addresses: vec![],
            topics: self.registry.events().topics(),
        };
        let logs = self.logs.logs(&filter).await?;
        tracing::debug!(
            from = *range.start(),
            to = *range.end(),
            logs = logs.len(),
            "indexing block range"
        );

        let timestamps: HashMap<u64, u64> = headers
            .iter()
            .map(|header| (header.number, header.timestamp))
            .collect();
        let data = self.registry.dispatch(&logs, &timestamps, &self.ctx).await?;
        self.store.persist(&data).await?;

        // Blocks are recorded only after their events are safely stored;
        // a crash in between re-indexes the range on the next run.
        {
            let mut ex = self.store.pool().acquire().await?;
            for header in &headers {
                blocks::insert(
                    &mut ex,
                    &blocks::Block {
                        number: u64_to_i64(header.number),
                        hash: ByteArray(header.hash.0),
                        timestamp: u64_to_i64(header.timestamp),
                    },
                )
                .await?;
            }
        }

        // Enrichment is best effort and never blocks fill visibility.
        if let Some(engine) = &self.royalties {
            let fills: Vec<_> = data.all_fills().cloned().collect();
            if !fills.is_empty()
                && let Err(err) = engine.assign(&fills).await
            {
                tracing::warn!(?err, "royalty enrichment failed for batch");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Maintaining for EventIndexer {
    async fn run_maintenance(&self) -> Result<()> {
        self.update_events().await
    }
}

/// Splits `[from, to]` into consecutive windows of at most
/// [`MAX_BLOCKS_QUERIED`] blocks.
fn windows(from: u64, to: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = (start + MAX_BLOCKS_QUERIED - 1).min(to);
        windows.push((start, end));
        start = end + 1;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_the_range_without_gaps() {
        assert_eq!(windows(1, 1), vec![(1, 1)]);
        assert_eq!(windows(1, MAX_BLOCKS_QUERIED), vec![(1, MAX_BLOCKS_QUERIED)]);
        assert_eq!(
            windows(1, MAX_BLOCKS_QUERIED + 1),
            vec![
                (1, MAX_BLOCKS_QUERIED),
                (MAX_BLOCKS_QUERIED + 1, MAX_BLOCKS_QUERIED + 1),
            ]
        );
        assert_eq!(
            windows(10, 10 + 3 * MAX_BLOCKS_QUERIED),
            vec![
                (10, 9 + MAX_BLOCKS_QUERIED),
                (10 + MAX_BLOCKS_QUERIED, 9 + 2 * MAX_BLOCKS_QUERIED),
                (10 + 2 * MAX_BLOCKS_QUERIED, 9 + 3 * MAX_BLOCKS_QUERIED),
                (10 + 3 * MAX_BLOCKS_QUERIED, 10 + 3 * MAX_BLOCKS_QUERIED),
            ]
        );
    }
}
