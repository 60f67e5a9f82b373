mod arguments;

use {
    anyhow::{Context, Result},
    arguments::Arguments,
    clap::Parser,
    ethrpc::{BlockRetrieving, EthRpc, RangeInclusive, block_stream},
    event_indexing::{
        consistency::BlockConsistencyChecker,
        context::{HandlerContext, NoAttribution},
        handlers::{HandlerRegistry, all_handlers},
        indexer::{EventIndexer, MAX_REORG_BLOCK_COUNT},
        maintenance::{Maintaining, ServiceMaintenance},
        store::EventStore,
    },
    price_oracle::PriceOracle,
    royalties::{
        RoyaltyEngine,
        adapter::{AdapterRegistry, Eip2981Lookup},
    },
    sqlx::PgPool,
    std::sync::Arc,
    token_info::{CachedTokenInfoFetcher, TokenInfoFetcher},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arguments::parse();
    observe::tracing::initialize(&args.log_filter);
    observe::metrics::setup_registry_reentrant(Some("marketplace_indexer".to_string()), None);
    tracing::info!(?args, "starting indexer");
    run(args).await
}

async fn run(args: Arguments) -> Result<()> {
    let pool = PgPool::connect(args.db_url.as_str())
        .await
        .context("failed to connect to database")?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let rpc = Arc::new(EthRpc::new(client.clone(), args.node_url.clone()));

    let tokens = Arc::new(CachedTokenInfoFetcher::new(Arc::new(TokenInfoFetcher::new(
        rpc.clone(),
        args.native_decimals,
    ))));
    let feed = Arc::new(price_oracle::feed::DayPriceFeed::new(
        client,
        args.price_feed_url.clone(),
        args.price_feed_api_key.clone(),
        args.chain_slug.clone(),
        args.native_coin_id.clone(),
    ));
    let oracle = Arc::new(PriceOracle::new(
        pool.clone(),
        feed,
        tokens,
        args.native_decimals,
    ));

    let ctx = HandlerContext::new(
        oracle,
        rpc.clone(),
        rpc.clone(),
        Arc::new(NoAttribution),
    );
    let royalty_engine = Arc::new(RoyaltyEngine::new(
        AdapterRegistry::new(Arc::new(Eip2981Lookup::new(rpc.clone()))),
        pool.clone(),
    ));
    let indexer = Arc::new(EventIndexer::new(
        rpc.clone(),
        rpc.clone(),
        HandlerRegistry::new(all_handlers()),
        ctx,
        EventStore::new(pool.clone()),
        Some(royalty_engine),
    ));

    let checker = BlockConsistencyChecker::new(
        pool,
        rpc.clone(),
        MAX_REORG_BLOCK_COUNT,
        args.consistency_lease_ttl,
        format!("indexer-{}", std::process::id()),
    );
    let repair = Arc::new(ReorgRepair {
        checker,
        indexer: indexer.clone(),
    });

    let block_stream = block_stream::current_block_stream(
        rpc as Arc<dyn BlockRetrieving>,
        args.block_poll_interval,
    )
    .await
    .context("failed to start current block stream")?;

    let maintainers: Vec<Arc<dyn Maintaining>> = vec![repair, indexer];
    let maintenance = ServiceMaintenance { maintainers };
    maintenance.run_maintenance_on_new_block(block_stream).await
}

/// Runs the consistency check and immediately re-indexes whatever ranges
/// it reported orphaned.
struct ReorgRepair {
    checker: BlockConsistencyChecker,
    indexer: Arc<EventIndexer>,
}

#[async_trait::async_trait]
impl Maintaining for ReorgRepair {
    async fn run_maintenance(&self) -> Result<()> {
        let ranges: Vec<RangeInclusive<u64>> = self.checker.verify().await?;
        for range in ranges {
            tracing::info!(from = *range.start(), to = *range.end(), "resyncing orphaned range");
            self.indexer.index_range(range).await?;
        }
        Ok(())
    }
}
