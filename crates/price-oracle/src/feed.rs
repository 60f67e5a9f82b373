use {
    alloy_primitives::Address,
    anyhow::{Context, anyhow},
    async_trait::async_trait,
    bigdecimal::BigDecimal,
    model::NATIVE_CURRENCY,
    reqwest::{Client, StatusCode},
    serde::Deserialize,
    url::Url,
};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("rate limited")]
    RateLimited,
    #[error("no price bar for the requested day")]
    NoPrice,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Upstream source of day-granularity USD prices.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait PriceFeeding: Send + Sync {
    /// USD price of one whole token on the given (day-truncated) day.
    async fn usd_price(&self, currency: Address, day: u64) -> Result<BigDecimal, FeedError>;
}

#[derive(Debug, Deserialize)]
struct Response {
    /// `[millisecond timestamp, price]` pairs.
    prices: Vec<(f64, f64)>,
}

/// Day-bar price feed speaking the coingecko market-chart API.
pub struct DayPriceFeed {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    /// Asset-platform slug used for contract lookups, e.g. "ethereum".
    chain: String,
    /// Coin id of the chain's native currency, e.g. "ethereum".
    native_coin: String,
}

impl DayPriceFeed {
    const AUTHORIZATION: &'static str = "x-cg-pro-api-key";

    pub fn new(
        client: Client,
        base_url: Url,
        api_key: Option<String>,
        chain: String,
        native_coin: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            chain,
            native_coin,
        }
    }

    fn price_url(&self, currency: Address, day: u64) -> Result<Url, FeedError> {
        let path = if currency == NATIVE_CURRENCY {
            format!("coins/{}/market_chart/range", self.native_coin)
        } else {
            format!(
                "coins/{}/contract/{currency:#x}/market_chart/range",
                self.chain
            )
        };
        let mut url = self
            .base_url
            .join(&path)
            .context("failed to build feed url")?;
        url.query_pairs_mut()
            .append_pair("vs_currency", "usd")
            .append_pair("from", &day.to_string())
            .append_pair("to", &(day + crate::SECONDS_PER_DAY).to_string());
        Ok(url)
    }
}

#[async_trait]
impl PriceFeeding for DayPriceFeed {
    async fn usd_price(&self, currency: Address, day: u64) -> Result<BigDecimal, FeedError> {
        let url = self.price_url(currency, day)?;
        let mut builder = self.client.get(url);
        if let Some(ref api_key) = self.api_key {
            builder = builder.header(Self::AUTHORIZATION, api_key);
        }
        let response = builder
            .send()
            .await
            .context("failed to send price request")?;
        match response.status() {
            status if status.is_success() => (),
            StatusCode::TOO_MANY_REQUESTS => return Err(FeedError::RateLimited),
            status => {
                return Err(anyhow!("price feed returned non-success status {status}").into());
            }
        }
        let response: Response = response
            .json()
            .await
            .context("failed to decode price response")?;

        let (_, price) = response.prices.first().ok_or(FeedError::NoPrice)?;
        BigDecimal::try_from(*price)
            .context("price is not a finite number")
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_distinguish_native_and_contract_lookups() {
        let feed = DayPriceFeed::new(
            Client::new(),
            Url::parse("https://pro-api.coingecko.com/api/v3/").unwrap(),
            None,
            "ethereum".to_string(),
            "ethereum".to_string(),
        );

        let url = feed.price_url(NATIVE_CURRENCY, 86_400).unwrap();
        assert!(url.path().ends_with("coins/ethereum/market_chart/range"));
        assert!(url.query().unwrap().contains("from=86400"));
        assert!(url.query().unwrap().contains("to=172800"));

        let url = feed
            .price_url(Address::with_last_byte(1), 86_400)
            .unwrap();
        assert!(url.path().contains("contract/0x"));
    }
}
