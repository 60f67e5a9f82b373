use {
    alloy_primitives::{Address, B256, U256},
    alloy_sol_types::SolCall,
    anyhow::{Context, Result},
    async_trait::async_trait,
    ethrpc::CallExecuting,
    model::{
        events::{FeeRecipient, FillEvent},
        order::OrderKind,
        royalty::{BPS_DENOMINATOR, RoyaltyResult},
    },
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    },
    strum::IntoEnumIterator,
};

mod eip2981 {
    alloy_sol_types::sol! {
        function royaltyInfo(uint256 tokenId, uint256 salePrice)
            external view returns (address receiver, uint256 royaltyAmount);
    }
}

/// On-chain royalty recipient lookup.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait RoyaltyLookup: Send + Sync {
    /// The royalty recipients a sale of `token_id` at `sale_price` owes.
    async fn token_royalties(
        &self,
        contract: Address,
        token_id: U256,
        sale_price: U256,
    ) -> Result<Vec<FeeRecipient>>;
}

pub struct Eip2981Lookup {
    rpc: Arc<dyn CallExecuting>,
}

impl Eip2981Lookup {
    pub fn new(rpc: Arc<dyn CallExecuting>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl RoyaltyLookup for Eip2981Lookup {
    async fn token_royalties(
        &self,
        contract: Address,
        token_id: U256,
        sale_price: U256,
    ) -> Result<Vec<FeeRecipient>> {
        if sale_price.is_zero() {
            return Ok(vec![]);
        }
        let call = eip2981::royaltyInfoCall {
            tokenId: token_id,
            salePrice: sale_price,
        };
        // Collections that do not implement the interface revert; that
        // simply means "no on-chain royalties".
        let Ok(data) = self.rpc.call(contract, call.abi_encode().into()).await else {
            return Ok(vec![]);
        };
        let returns =
            eip2981::royaltyInfoCall::abi_decode_returns(&data).context("bad royaltyInfo data")?;
        if returns.receiver == Address::ZERO || returns.royaltyAmount.is_zero() {
            return Ok(vec![]);
        }
        let bps = returns.royaltyAmount * U256::from(BPS_DENOMINATOR) / sale_price;
        Ok(vec![FeeRecipient {
            recipient: returns.receiver,
            bps: u16::try_from(bps).unwrap_or(u16::MAX),
        }])
    }
}

/// State shared by all adapter invocations of one enrichment batch, so
/// repeated lookups for the same token or transaction hit the cache
/// instead of the chain.
#[derive(Default)]
pub struct BatchCache {
    royalties: Mutex<HashMap<(Address, U256), Vec<FeeRecipient>>>,
    trade_occurrences: Mutex<HashMap<(B256, OrderKind), usize>>,
}

impl BatchCache {
    pub async fn royalties_for(
        &self,
        lookup: &dyn RoyaltyLookup,
        contract: Address,
        token_id: U256,
        sale_price: U256,
    ) -> Result<Vec<FeeRecipient>> {
        if let Some(hit) = self.royalties.lock().unwrap().get(&(contract, token_id)) {
            return Ok(hit.clone());
        }
        let fetched = lookup.token_royalties(contract, token_id, sale_price).await?;
        self.royalties
            .lock()
            .unwrap()
            .insert((contract, token_id), fetched.clone());
        Ok(fetched)
    }

    /// Zero-based rank of this trade among same-kind trades of the
    /// transaction, in invocation order.
    pub fn next_trade_rank(&self, tx_hash: B256, kind: OrderKind) -> usize {
        let mut occurrences = self.trade_occurrences.lock().unwrap();
        let rank = occurrences.entry((tx_hash, kind)).or_default();
        let current = *rank;
        *rank += 1;
        current
    }
}

#[async_trait]
pub trait RoyaltyAdapter: Send + Sync {
    async fn assign(&self, fill: &FillEvent, cache: &BatchCache) -> Result<RoyaltyResult>;
}

/// Generic adapter: on-chain royalties plus a flat marketplace fee for
/// the protocol family. Whether the sale actually honored the royalty is
/// unknowable here, so it only claims full payment when there is nothing
/// to pay.
pub struct DefaultAdapter {
    lookup: Arc<dyn RoyaltyLookup>,
    marketplace_fee_bps: u16,
}

impl DefaultAdapter {
    pub fn new(lookup: Arc<dyn RoyaltyLookup>, marketplace_fee_bps: u16) -> Self {
        Self {
            lookup,
            marketplace_fee_bps,
        }
    }
}

#[async_trait]
impl RoyaltyAdapter for DefaultAdapter {
    async fn assign(&self, fill: &FillEvent, cache: &BatchCache) -> Result<RoyaltyResult> {
        let royalties = cache
            .royalties_for(&*self.lookup, fill.contract, fill.token_id, fill.price)
            .await?;
        let royalty_fee_bps = royalties
            .iter()
            .fold(0u16, |acc, fee| acc.saturating_add(fee.bps));
        Ok(RoyaltyResult {
            royalty_fee_bps,
            marketplace_fee_bps: self.marketplace_fee_bps,
            paid_full_royalty: royalties.is_empty(),
            royalty_fee_breakdown: royalties,
            marketplace_fee_breakdown: vec![FeeRecipient {
                recipient: fill.base.address,
                bps: self.marketplace_fee_bps,
            }],
        })
    }
}

/// Order-book exchanges enforce creator royalties at settlement, so the
/// looked-up royalty counts as paid. The per-transaction trade rank keyed
/// by `(tx_hash, kind)` keeps fee attribution straight when one
/// settlement carries several trades.
pub struct OrderBookAdapter {
    lookup: Arc<dyn RoyaltyLookup>,
}

impl OrderBookAdapter {
    /// Protocol fee the order book exchange takes on every settlement.
    const EXCHANGE_FEE_BPS: u16 = 250;

    pub fn new(lookup: Arc<dyn RoyaltyLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl RoyaltyAdapter for OrderBookAdapter {
    async fn assign(&self, fill: &FillEvent, cache: &BatchCache) -> Result<RoyaltyResult> {
        let rank = cache.next_trade_rank(fill.base.tx_hash, fill.kind);
        let royalties = cache
            .royalties_for(&*self.lookup, fill.contract, fill.token_id, fill.price)
            .await?;
        let royalty_fee_bps = royalties
            .iter()
            .fold(0u16, |acc, fee| acc.saturating_add(fee.bps));
        // The exchange charges its protocol fee once per settlement; the
        // trades that piggyback on the same transaction ride for free.
        let marketplace_fee_bps = if rank == 0 {
            Self::EXCHANGE_FEE_BPS
        } else {
            0
        };
        Ok(RoyaltyResult {
            royalty_fee_bps,
            marketplace_fee_bps,
            paid_full_royalty: true,
            royalty_fee_breakdown: royalties,
            marketplace_fee_breakdown: if marketplace_fee_bps > 0 {
                vec![FeeRecipient {
                    recipient: fill.base.address,
                    bps: marketplace_fee_bps,
                }]
            } else {
                vec![]
            },
        })
    }
}

/// Adapter selection, resolved once per order kind at startup. The
/// fallback is an explicit variant rather than an implicit registry miss.
pub enum Adapter {
    OrderBook(OrderBookAdapter),
    Fallback(DefaultAdapter),
}

impl Adapter {
    pub async fn assign(&self, fill: &FillEvent, cache: &BatchCache) -> Result<RoyaltyResult> {
        match self {
            Self::OrderBook(adapter) => adapter.assign(fill, cache).await,
            Self::Fallback(adapter) => adapter.assign(fill, cache).await,
        }
    }
}

pub struct AdapterRegistry {
    adapters: HashMap<OrderKind, Adapter>,
}

impl AdapterRegistry {
    pub fn new(lookup: Arc<dyn RoyaltyLookup>) -> Self {
        let adapters = OrderKind::iter()
            .map(|kind| {
                let adapter = match kind {
                    OrderKind::OrderBook => {
                        Adapter::OrderBook(OrderBookAdapter::new(lookup.clone()))
                    }
                    _ => Adapter::Fallback(DefaultAdapter::new(
                        lookup.clone(),
                        default_marketplace_fee(kind),
                    )),
                };
                (kind, adapter)
            })
            .collect();
        Self { adapters }
    }

    pub fn resolve(&self, kind: OrderKind) -> &Adapter {
        // Every kind got an entry at construction.
        &self.adapters[&kind]
    }
}

fn default_marketplace_fee(kind: OrderKind) -> u16 {
    match kind {
        OrderKind::OrderBook => OrderBookAdapter::EXCHANGE_FEE_BPS,
        OrderKind::AuctionHouse => 500,
        // The pool takes its cut through the swap spread and liquidations
        // carry no marketplace at all.
        OrderKind::AmmPool | OrderKind::LoanCollateral => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_cache_deduplicates_lookups() {
        let mut lookup = MockRoyaltyLookup::new();
        lookup.expect_token_royalties().times(1).returning(|_, _, _| {
            Ok(vec![FeeRecipient {
                recipient: Address::with_last_byte(9),
                bps: 500,
            }])
        });

        let cache = BatchCache::default();
        for _ in 0..3 {
            let royalties = cache
                .royalties_for(
                    &lookup,
                    Address::with_last_byte(1),
                    U256::from(42),
                    U256::from(1000),
                )
                .await
                .unwrap();
            assert_eq!(royalties.len(), 1);
        }
    }

    #[test]
    fn trade_ranks_are_per_transaction_and_kind() {
        let cache = BatchCache::default();
        let tx = B256::repeat_byte(1);
        assert_eq!(cache.next_trade_rank(tx, OrderKind::OrderBook), 0);
        assert_eq!(cache.next_trade_rank(tx, OrderKind::OrderBook), 1);
        assert_eq!(cache.next_trade_rank(tx, OrderKind::AmmPool), 0);
        assert_eq!(
            cache.next_trade_rank(B256::repeat_byte(2), OrderKind::OrderBook),
            0
        );
    }

    #[tokio::test]
    async fn order_book_adapter_charges_exchange_fee_once_per_tx() {
        let mut lookup = MockRoyaltyLookup::new();
        lookup
            .expect_token_royalties()
            .returning(|_, _, _| Ok(vec![]));
        let adapter = OrderBookAdapter::new(Arc::new(lookup));
        let cache = BatchCache::default();

        let mut fill = FillEvent::default();
        fill.base.tx_hash = B256::repeat_byte(1);
        let first = adapter.assign(&fill, &cache).await.unwrap();
        assert_eq!(first.marketplace_fee_bps, 250);
        let second = adapter.assign(&fill, &cache).await.unwrap();
        assert_eq!(second.marketplace_fee_bps, 0);
        assert!(second.marketplace_fee_breakdown.is_empty());
    }

    #[tokio::test]
    async fn registry_resolves_specialized_and_fallback_adapters() {
        let mut lookup = MockRoyaltyLookup::new();
        lookup
            .expect_token_royalties()
            .returning(|_, _, _| Ok(vec![]));
        let registry = AdapterRegistry::new(Arc::new(lookup));

        assert!(matches!(
            registry.resolve(OrderKind::OrderBook),
            Adapter::OrderBook(_)
        ));
        assert!(matches!(
            registry.resolve(OrderKind::AmmPool),
            Adapter::Fallback(_)
        ));

        let fill = FillEvent {
            kind: OrderKind::AuctionHouse,
            price: U256::from(1000),
            ..Default::default()
        };
        let result = registry
            .resolve(fill.kind)
            .assign(&fill, &BatchCache::default())
            .await
            .unwrap();
        assert_eq!(result.marketplace_fee_bps, 500);
    }
}
