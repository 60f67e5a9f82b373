use {std::time::Duration, url::Url};

#[derive(clap::Parser, Debug)]
pub struct Arguments {
    /// Postgres connection url.
    #[clap(long, env, default_value = "postgresql://")]
    pub db_url: Url,

    /// JSON-RPC node url. Must support `debug_traceTransaction` with the
    /// call tracer for pool-based protocols.
    #[clap(long, env, default_value = "http://localhost:8545")]
    pub node_url: Url,

    /// Base url of the day-bar price feed.
    #[clap(long, env, default_value = "https://pro-api.coingecko.com/api/v3/")]
    pub price_feed_url: Url,

    #[clap(long, env)]
    pub price_feed_api_key: Option<String>,

    /// Asset-platform slug used for contract price lookups.
    #[clap(long, env, default_value = "ethereum")]
    pub chain_slug: String,

    /// Price feed coin id of the chain's native currency.
    #[clap(long, env, default_value = "ethereum")]
    pub native_coin_id: String,

    #[clap(long, env, default_value = "18")]
    pub native_decimals: u8,

    /// How often to poll the node for a new current block.
    #[clap(long, env, default_value = "5s", value_parser = humantime::parse_duration)]
    pub block_poll_interval: Duration,

    /// Expiry of the block-consistency repair lease.
    #[clap(long, env, default_value = "60s", value_parser = humantime::parse_duration)]
    pub consistency_lease_ttl: Duration,

    #[clap(long, env, default_value = "warn,indexer=debug,event_indexing=debug")]
    pub log_filter: String,
}
