//! Pool-based exchange: the pair contract is itself the maker. Its swap
//! logs carry no payload at all, so price, token ids and taker are
//! recovered from the transaction's call trace. Swaps against the same
//! pair within one transaction are told apart by their occurrence rank,
//! counted per entry-point selector so buys and sells of the same pair
//! do not steal each other's ranks.

use {
    crate::{
        accumulator::OnChainData,
        context::{CallOccurrences, HandlerContext, SkipReason},
        handlers::{MatchedEvent, ProtocolHandler},
        matcher::{EventDescriptor, EventSubKind},
    },
    alloy_primitives::{Address, B256, U256, keccak256},
    alloy_sol_types::{SolCall, SolEvent},
    anyhow::Result,
    async_trait::async_trait,
    ethrpc::CallFrame,
    model::{
        NATIVE_CURRENCY,
        events::{FillEvent, OnChainOrderInfo, OrderSide},
        order::OrderKind,
    },
    std::collections::HashMap,
};

mod abi {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        event SwapNFTInPair();

        #[derive(Debug)]
        event SwapNFTOutPair();

        function swapTokenForSpecificNFTs(
            uint256[] calldata nftIds,
            uint256 maxExpectedTokenInput,
            address nftRecipient,
            bool isRouter,
            address routerCaller
        ) external payable returns (uint256 inputAmount);

        function swapNFTsForToken(
            uint256[] calldata nftIds,
            uint256 minExpectedTokenOutput,
            address tokenRecipient,
            bool isRouter,
            address routerCaller
        ) external returns (uint256 outputAmount);

        function nft() external view returns (address);
        function token() external view returns (address);
    }
}

/// Deterministic id for the standing pool quote a swap filled.
pub fn pool_order_id(pool: Address, side: OrderSide) -> String {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(b"amm-pool");
    preimage.extend_from_slice(pool.as_slice());
    preimage.push(match side {
        OrderSide::Buy => 0,
        OrderSide::Sell => 1,
    });
    keccak256(preimage).to_string()
}

/// The decoded essence of a located swap sub-call.
struct Swap {
    token_ids: Vec<U256>,
    total: U256,
    taker: Address,
}

pub struct Pool;

#[async_trait]
impl ProtocolHandler for Pool {
    fn kind(&self) -> OrderKind {
        OrderKind::AmmPool
    }

    fn descriptors(&self) -> Vec<EventDescriptor> {
        vec![
            EventDescriptor {
                kind: OrderKind::AmmPool,
                sub_kind: EventSubKind::SwapNftIn,
                topic: abi::SwapNFTInPair::SIGNATURE_HASH,
                num_topics: 1,
                address_filter: None,
            },
            EventDescriptor {
                kind: OrderKind::AmmPool,
                sub_kind: EventSubKind::SwapNftOut,
                topic: abi::SwapNFTOutPair::SIGNATURE_HASH,
                num_topics: 1,
                address_filter: None,
            },
        ]
    }

    async fn handle(
        &self,
        events: &[MatchedEvent],
        ctx: &HandlerContext,
        occurrences: &CallOccurrences,
    ) -> Result<OnChainData> {
        let mut data = OnChainData::default();
        // Traces and pool metadata are fetched once per transaction and
        // pool respectively, not once per event.
        let mut traces: HashMap<B256, Option<CallFrame>> = HashMap::new();
        let mut currencies: HashMap<Address, Address> = HashMap::new();
        let mut collections: HashMap<Address, Option<Address>> = HashMap::new();

        for event in events {
            let tx_hash = event.base.tx_hash;
            if !traces.contains_key(&tx_hash) {
                let trace = match ctx.traces.call_trace(tx_hash).await {
                    Ok(trace) => Some(trace),
                    Err(err) => {
                        tracing::warn!(?err, ?tx_hash, "failed to fetch call trace");
                        None
                    }
                };
                traces.insert(tx_hash, trace);
            }
            let Some(trace) = traces[&tx_hash].as_ref() else {
                ctx.record_skip(
                    &SkipReason::TraceUnavailable,
                    tx_hash,
                    Some(event.base.log_index),
                );
                continue;
            };

            match self
                .swap_fills(event, trace, ctx, occurrences, &mut currencies, &mut collections)
                .await?
            {
                Ok((fills, order)) => {
                    data.matched_fills.extend(fills);
                    data.orders.push(order);
                }
                Err(reason) => {
                    ctx.record_skip(&reason, tx_hash, Some(event.base.log_index));
                }
            }
        }
        Ok(data)
    }
}

impl Pool {
    async fn swap_fills(
        &self,
        event: &MatchedEvent,
        trace: &CallFrame,
        ctx: &HandlerContext,
        occurrences: &CallOccurrences,
        currencies: &mut HashMap<Address, Address>,
        collections: &mut HashMap<Address, Option<Address>>,
    ) -> Result<Result<(Vec<FillEvent>, OnChainOrderInfo), SkipReason>> {
        let pool = event.base.address;
        let side = match event.sub_kind {
            // NFTs leaving the pair fill the pool's sell quote; NFTs
            // entering fill its standing buy quote.
            EventSubKind::SwapNftOut => OrderSide::Sell,
            _ => OrderSide::Buy,
        };

        let selector = match side {
            OrderSide::Sell => abi::swapTokenForSpecificNFTsCall::SELECTOR,
            OrderSide::Buy => abi::swapNFTsForTokenCall::SELECTOR,
        };
        let rank = occurrences.next(event.base.tx_hash, pool, selector);
        let Some(frame) = nth_call_to(trace, pool, selector, rank) else {
            return Ok(Err(SkipReason::CallNotFound));
        };

        let Some(swap) = decode_swap(frame, side) else {
            return Ok(Err(SkipReason::MalformedLog));
        };
        if swap.token_ids.is_empty() {
            return Ok(Err(SkipReason::MalformedLog));
        }

        let contract = match collections.get(&pool) {
            Some(cached) => *cached,
            None => {
                let fetched = self.pool_collection(ctx, pool).await;
                collections.insert(pool, fetched);
                fetched
            }
        };
        let Some(contract) = contract else {
            return Ok(Err(SkipReason::LookupFailed));
        };
        let currency = match currencies.get(&pool) {
            Some(cached) => *cached,
            None => {
                let fetched = self.pool_currency(ctx, pool).await;
                currencies.insert(pool, fetched);
                fetched
            }
        };

        let order_id = pool_order_id(pool, side);
        let attribution = ctx
            .attribution
            .attribution(event.base.tx_hash, OrderKind::AmmPool, Some(order_id.clone()))
            .await?;
        let taker = attribution.taker.unwrap_or(swap.taker);

        // The pair settles many tokens in one call at an aggregate price;
        // downstream consumers want a per-unit price.
        let count = U256::from(swap.token_ids.len());
        let currency_price = swap.total / count;

        let prices = ctx
            .pricing
            .usd_and_native_price(currency, currency_price, event.base.timestamp)
            .await?;
        let Some(native_price) = prices.native_price else {
            return Ok(Err(SkipReason::MissingNativePrice));
        };

        let fills = swap
            .token_ids
            .iter()
            .enumerate()
            .map(|(index, token_id)| {
                let mut base = event.base;
                base.batch_index = index as u64 + 1;
                FillEvent {
                    kind: OrderKind::AmmPool,
                    order_id: Some(order_id.clone()),
                    side,
                    maker: pool,
                    taker,
                    contract,
                    token_id: *token_id,
                    amount: U256::from(1),
                    currency,
                    currency_price,
                    price: native_price,
                    usd_price: prices.usd_price,
                    base,
                    ..Default::default()
                }
            })
            .collect();

        let order = OnChainOrderInfo {
            id: order_id,
            kind: OrderKind::AmmPool,
            side,
            maker: pool,
            contract,
            token_id: U256::ZERO,
            amount: count,
            currency,
            price: currency_price,
            valid_from: 0,
            valid_until: i64::MAX as u64,
            source: attribution.order_source,
        };

        Ok(Ok((fills, order)))
    }

    async fn pool_collection(&self, ctx: &HandlerContext, pool: Address) -> Option<Address> {
        let data = ctx
            .calls
            .call(pool, abi::nftCall {}.abi_encode().into())
            .await
            .ok()?;
        abi::nftCall::abi_decode_returns(&data).ok()
    }

    /// Pairs trading against an ERC-20 expose `token()`; native pairs
    /// revert on it.
    async fn pool_currency(&self, ctx: &HandlerContext, pool: Address) -> Address {
        let Ok(data) = ctx
            .calls
            .call(pool, abi::tokenCall {}.abi_encode().into())
            .await
        else {
            return NATIVE_CURRENCY;
        };
        abi::tokenCall::abi_decode_returns(&data).unwrap_or(NATIVE_CURRENCY)
    }
}

/// Depth-first search for the `rank`-th call to `to` whose input starts
/// with `selector`.
fn nth_call_to(
    trace: &CallFrame,
    to: Address,
    selector: [u8; 4],
    rank: usize,
) -> Option<&CallFrame> {
    fn walk<'a>(
        frame: &'a CallFrame,
        to: Address,
        selector: [u8; 4],
        remaining: &mut usize,
    ) -> Option<&'a CallFrame> {
        if frame.to == Some(to) && frame.input.starts_with(&selector) {
            if *remaining == 0 {
                return Some(frame);
            }
            *remaining -= 1;
        }
        frame
            .calls
            .iter()
            .find_map(|call| walk(call, to, selector, remaining))
    }
    let mut remaining = rank;
    walk(trace, to, selector, &mut remaining)
}

fn decode_swap(frame: &CallFrame, side: OrderSide) -> Option<Swap> {
    match side {
        OrderSide::Sell => {
            let call = abi::swapTokenForSpecificNFTsCall::abi_decode(&frame.input).ok()?;
            // The actual amount paid is in the call's return value; the
            // input only carries the buyer's upper bound.
            let total = match &frame.output {
                Some(output) => {
                    abi::swapTokenForSpecificNFTsCall::abi_decode_returns(output).ok()?
                }
                None => frame.value?,
            };
            Some(Swap {
                token_ids: call.nftIds,
                total,
                taker: if call.isRouter {
                    call.routerCaller
                } else {
                    frame.from
                },
            })
        }
        OrderSide::Buy => {
            let call = abi::swapNFTsForTokenCall::abi_decode(&frame.input).ok()?;
            let output = frame.output.as_ref()?;
            let total = abi::swapNFTsForTokenCall::abi_decode_returns(output).ok()?;
            Some(Swap {
                token_ids: call.nftIds,
                total,
                taker: if call.isRouter {
                    call.routerCaller
                } else {
                    frame.from
                },
            })
        }
    }
}
