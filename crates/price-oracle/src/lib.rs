//! Day-granularity conversion of currency amounts into USD and
//! native-currency terms, backed by a persistent sample cache and an
//! upstream price feed.

pub mod feed;

use {
    crate::feed::PriceFeeding,
    alloy_primitives::{Address, U256},
    anyhow::Result,
    async_trait::async_trait,
    bigdecimal::BigDecimal,
    database::usd_prices,
    model::{NATIVE_CURRENCY, royalty::USD_DECIMALS},
    number::conversions::{big_decimal_to_scaled_u256, u64_to_i64},
    sqlx::PgPool,
    std::sync::Arc,
    token_info::TokenInfoFetching,
};

pub const SECONDS_PER_DAY: u64 = 86_400;

pub fn truncate_to_day(timestamp: u64) -> u64 {
    timestamp - timestamp % SECONDS_PER_DAY
}

/// A converted amount. Either field is `None` when the inputs needed to
/// compute it could not be resolved; callers must treat a `None` native
/// price as "not price-able" rather than zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UsdNativePrice {
    /// Amount in USD, fixed point with [`USD_DECIMALS`] fractional digits.
    pub usd_price: Option<U256>,
    /// Amount in the native currency's smallest unit.
    pub native_price: Option<U256>,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait UsdNativePricing: Send + Sync {
    /// Converts `amount` of `currency` into USD and native terms at the
    /// day containing `timestamp`.
    async fn usd_and_native_price(
        &self,
        currency: Address,
        amount: U256,
        timestamp: u64,
    ) -> Result<UsdNativePrice>;
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "price_oracle")]
struct Metrics {
    /// day-sample cache lookups by result
    #[metric(labels("result"))]
    sample_cache_access: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}

pub struct PriceOracle {
    pool: PgPool,
    feed: Arc<dyn PriceFeeding>,
    tokens: Arc<dyn TokenInfoFetching>,
    native_decimals: u8,
}

impl PriceOracle {
    pub fn new(
        pool: PgPool,
        feed: Arc<dyn PriceFeeding>,
        tokens: Arc<dyn TokenInfoFetching>,
        native_decimals: u8,
    ) -> Self {
        Self {
            pool,
            feed,
            tokens,
            native_decimals,
        }
    }

    /// Resolves the authoritative USD sample for `(currency, day)`.
    ///
    /// An exact-day cache hit wins. On a miss the upstream feed is
    /// consulted and its answer persisted (first writer wins). If the feed
    /// fails, the latest cached sample is used even if stale; that is a
    /// diagnostic log entry, not an error.
    async fn resolve_sample(&self, currency: Address, day: u64) -> Result<Option<BigDecimal>> {
        let db_day = u64_to_i64(day);
        let mut ex = self.pool.acquire().await?;
        let cached =
            usd_prices::sample_at_or_before(&mut ex, to_db_address(currency), db_day).await?;
        if let Some(sample) = &cached
            && sample.day == db_day
        {
            Metrics::get()
                .sample_cache_access
                .with_label_values(&["hits"])
                .inc();
            return Ok(Some(sample.value.clone()));
        }
        Metrics::get()
            .sample_cache_access
            .with_label_values(&["misses"])
            .inc();

        match self.feed.usd_price(currency, day).await {
            Ok(value) => {
                usd_prices::insert(
                    &mut ex,
                    &usd_prices::Sample {
                        currency: to_db_address(currency),
                        day: db_day,
                        value: value.clone(),
                    },
                )
                .await?;
                Ok(Some(value))
            }
            Err(err) => match cached {
                Some(stale) => {
                    tracing::warn!(
                        ?err,
                        ?currency,
                        day,
                        stale_day = stale.day,
                        "price feed failed, falling back to stale sample"
                    );
                    Ok(Some(stale.value))
                }
                None => {
                    tracing::warn!(?err, ?currency, day, "no usd sample resolvable");
                    Ok(None)
                }
            },
        }
    }
}

#[async_trait]
impl UsdNativePricing for PriceOracle {
    async fn usd_and_native_price(
        &self,
        currency: Address,
        amount: U256,
        timestamp: u64,
    ) -> Result<UsdNativePrice> {
        let day = truncate_to_day(timestamp);

        let decimals = match self.tokens.get_token_info(currency).await {
            Ok(info) => info.decimals,
            Err(_) => None,
        };
        let Some(decimals) = decimals else {
            tracing::debug!(?currency, "unknown currency decimals, amount not price-able");
            return Ok(UsdNativePrice::default());
        };

        let currency_sample = self.resolve_sample(currency, day).await?;
        let native_sample = if currency == NATIVE_CURRENCY {
            currency_sample.clone()
        } else {
            self.resolve_sample(NATIVE_CURRENCY, day).await?
        };

        let usd_price = currency_sample
            .as_ref()
            .and_then(|sample| convert_to_usd(amount, decimals, sample));
        let native_price = if currency == NATIVE_CURRENCY {
            Some(amount)
        } else {
            match (&usd_price, &native_sample) {
                (Some(usd), Some(sample)) => {
                    convert_usd_to_native(*usd, self.native_decimals, sample)
                }
                _ => None,
            }
        };

        Ok(UsdNativePrice {
            usd_price,
            native_price,
        })
    }
}

fn to_db_address(address: Address) -> database::Address {
    database::byte_array::ByteArray(address.0.0)
}

fn pow10(exponent: u8) -> U256 {
    U256::from(10).pow(U256::from(exponent))
}

/// `usd = amount × usd_price_of_one_token / 10^decimals`, in fixed point
/// with [`USD_DECIMALS`] fractional digits.
fn convert_to_usd(amount: U256, decimals: u8, sample: &BigDecimal) -> Option<U256> {
    let unit_price = big_decimal_to_scaled_u256(sample, USD_DECIMALS)?;
    amount
        .checked_mul(unit_price)
        .map(|value| value / pow10(decimals))
}

/// Rescales a fixed-point USD amount into native smallest units through
/// the native currency's own USD sample.
fn convert_usd_to_native(usd: U256, native_decimals: u8, sample: &BigDecimal) -> Option<U256> {
    let native_unit_price = big_decimal_to_scaled_u256(sample, USD_DECIMALS)?;
    if native_unit_price.is_zero() {
        return None;
    }
    usd.checked_mul(pow10(native_decimals))
        .map(|value| value / native_unit_price)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::feed::{FeedError, MockPriceFeeding},
        std::str::FromStr,
        token_info::{MockTokenInfoFetching, TokenInfo},
    };

    #[test]
    fn day_truncation() {
        assert_eq!(truncate_to_day(0), 0);
        assert_eq!(truncate_to_day(86_399), 0);
        assert_eq!(truncate_to_day(86_400), 86_400);
        assert_eq!(truncate_to_day(1_700_000_000), 1_699_920_000);
    }

    #[test]
    fn converts_native_amounts_to_usd() {
        // 1.5 units of an 18-decimals currency at 1850 USD.
        let usd = convert_to_usd(
            U256::from(1_500_000_000_000_000_000u128),
            18,
            &BigDecimal::from(1850),
        )
        .unwrap();
        assert_eq!(usd, U256::from(2_775_000_000u64));
    }

    #[test]
    fn converts_usd_amounts_to_native() {
        // 1000 USD at 1850 USD per native unit.
        let native = convert_usd_to_native(
            U256::from(1_000_000_000u64),
            18,
            &BigDecimal::from(1850),
        )
        .unwrap();
        assert_eq!(native, U256::from(540_540_540_540_540_540u128));
    }

    #[test]
    fn fractional_sample_precision_is_kept() {
        // A low-priced currency; six fixed-point digits survive.
        let sample = BigDecimal::from_str("0.000123").unwrap();
        let usd = convert_to_usd(U256::from(1_000_000u64), 6, &sample).unwrap();
        assert_eq!(usd, U256::from(123u64));
    }

    #[test]
    fn zero_native_sample_is_not_priceable() {
        assert_eq!(
            convert_usd_to_native(U256::from(1), 18, &BigDecimal::from(0)),
            None
        );
    }

    async fn oracle_with(
        feed: MockPriceFeeding,
        decimals: Option<u8>,
    ) -> PriceOracle {
        let mut tokens = MockTokenInfoFetching::new();
        tokens.expect_get_token_info().returning(move |_| {
            Ok(TokenInfo {
                decimals,
                symbol: None,
            })
        });
        let pool = PgPool::connect("postgresql://").await.unwrap();
        sqlx::query("TRUNCATE usd_prices;")
            .execute(&pool)
            .await
            .unwrap();
        PriceOracle::new(pool, Arc::new(feed), Arc::new(tokens), 18)
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_upstream_fetch_is_persisted_and_reused() {
        let mut feed = MockPriceFeeding::new();
        // One fetch for the currency and one for the native coin; the
        // second oracle call must be served from the cache.
        feed.expect_usd_price()
            .times(2)
            .returning(|currency, _| {
                Ok(if currency == NATIVE_CURRENCY {
                    BigDecimal::from(2000)
                } else {
                    BigDecimal::from(1)
                })
            });
        let oracle = oracle_with(feed, Some(6)).await;

        let currency = Address::with_last_byte(42);
        for _ in 0..2 {
            let price = oracle
                .usd_and_native_price(currency, U256::from(1_000_000u64), 1_700_000_000)
                .await
                .unwrap();
            assert_eq!(price.usd_price, Some(U256::from(1_000_000u64)));
            assert_eq!(
                price.native_price,
                Some(U256::from(500_000_000_000_000u128))
            );
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_feed_failure_without_cache_yields_no_price() {
        let mut feed = MockPriceFeeding::new();
        feed.expect_usd_price()
            .returning(|_, _| Err(FeedError::NoPrice));
        let oracle = oracle_with(feed, Some(18)).await;

        let price = oracle
            .usd_and_native_price(Address::with_last_byte(42), U256::from(1), 1_700_000_000)
            .await
            .unwrap();
        assert_eq!(price, UsdNativePrice::default());
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_stale_sample_is_used_when_feed_fails() {
        let mut feed = MockPriceFeeding::new();
        feed.expect_usd_price()
            .returning(|_, _| Err(FeedError::RateLimited));
        let oracle = oracle_with(feed, Some(18)).await;

        // Seed a sample from the previous day.
        let mut ex = oracle.pool.acquire().await.unwrap();
        let currency = Address::with_last_byte(42);
        for seeded in [currency, NATIVE_CURRENCY] {
            usd_prices::insert(
                &mut ex,
                &usd_prices::Sample {
                    currency: to_db_address(seeded),
                    day: u64_to_i64(truncate_to_day(1_700_000_000) - SECONDS_PER_DAY),
                    value: BigDecimal::from(100),
                },
            )
            .await
            .unwrap();
        }

        let price = oracle
            .usd_and_native_price(
                currency,
                U256::from(1_000_000_000_000_000_000u128),
                1_700_000_000,
            )
            .await
            .unwrap();
        assert_eq!(price.usd_price, Some(U256::from(100_000_000u64)));
        assert_eq!(
            price.native_price,
            Some(U256::from(1_000_000_000_000_000_000u128))
        );
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_unknown_decimals_never_defaults_to_zero() {
        let feed = MockPriceFeeding::new();
        let oracle = oracle_with(feed, None).await;

        let price = oracle
            .usd_and_native_price(Address::with_last_byte(42), U256::from(1), 1_700_000_000)
            .await
            .unwrap();
        assert_eq!(price.usd_price, None);
        assert_eq!(price.native_price, None);
    }
}
