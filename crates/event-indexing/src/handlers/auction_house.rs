//! Auction house: reserve auctions settled by the house contract. The
//! settlement event carries everything needed, including the currency the
//! auction ran in.

use {
    crate::{
        accumulator::OnChainData,
        context::{CallOccurrences, HandlerContext, SkipReason},
        handlers::{MatchedEvent, ProtocolHandler},
        matcher::{EventDescriptor, EventSubKind},
    },
    alloy_primitives::{Address, U256, keccak256},
    alloy_sol_types::SolEvent,
    anyhow::Result,
    async_trait::async_trait,
    model::{
        events::{CancelEvent, FillEvent, OrderSide},
        order::OrderKind,
    },
};

mod abi {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        event AuctionSettled(
            uint256 indexed auctionId,
            uint256 indexed tokenId,
            address indexed tokenContract,
            address seller,
            address winner,
            uint256 amount,
            address currency
        );

        #[derive(Debug)]
        event AuctionCancelled(
            uint256 indexed auctionId,
            uint256 indexed tokenId,
            address indexed tokenContract,
            address seller
        );
    }
}

fn auction_order_id(house: Address, auction_id: U256) -> String {
    let mut preimage = Vec::with_capacity(65);
    preimage.extend_from_slice(b"auction-house");
    preimage.extend_from_slice(house.as_slice());
    preimage.extend_from_slice(&auction_id.to_be_bytes::<32>());
    keccak256(preimage).to_string()
}

pub struct AuctionHouse;

#[async_trait]
impl ProtocolHandler for AuctionHouse {
    fn kind(&self) -> OrderKind {
        OrderKind::AuctionHouse
    }

    fn descriptors(&self) -> Vec<EventDescriptor> {
        vec![
            EventDescriptor {
                kind: OrderKind::AuctionHouse,
                sub_kind: EventSubKind::AuctionSettled,
                topic: abi::AuctionSettled::SIGNATURE_HASH,
                num_topics: 4,
                address_filter: None,
            },
            EventDescriptor {
                kind: OrderKind::AuctionHouse,
                sub_kind: EventSubKind::AuctionCancelled,
                topic: abi::AuctionCancelled::SIGNATURE_HASH,
                num_topics: 4,
                address_filter: None,
            },
        ]
    }

    async fn handle(
        &self,
        events: &[MatchedEvent],
        ctx: &HandlerContext,
        _occurrences: &CallOccurrences,
    ) -> Result<OnChainData> {
        let mut data = OnChainData::default();
        for event in events {
            match event.sub_kind {
                EventSubKind::AuctionSettled => match self.settlement(event, ctx).await? {
                    Ok(fill) => data.fills.push(fill),
                    Err(reason) => {
                        ctx.record_skip(&reason, event.base.tx_hash, Some(event.base.log_index))
                    }
                },
                EventSubKind::AuctionCancelled => {
                    let Ok(decoded) = event.log.log_decode::<abi::AuctionCancelled>() else {
                        ctx.record_skip(
                            &SkipReason::MalformedLog,
                            event.base.tx_hash,
                            Some(event.base.log_index),
                        );
                        continue;
                    };
                    data.cancels.push(CancelEvent {
                        kind: OrderKind::AuctionHouse,
                        order_id: auction_order_id(event.base.address, decoded.data().auctionId),
                        maker: decoded.data().seller,
                        base: event.base,
                    });
                }
                _ => {}
            }
        }
        Ok(data)
    }
}

impl AuctionHouse {
    async fn settlement(
        &self,
        event: &MatchedEvent,
        ctx: &HandlerContext,
    ) -> Result<Result<FillEvent, SkipReason>> {
        let decoded = match event.log.log_decode::<abi::AuctionSettled>() {
            Ok(log) => log.data().clone(),
            Err(_) => return Ok(Err(SkipReason::MalformedLog)),
        };

        let order_id = auction_order_id(event.base.address, decoded.auctionId);
        let attribution = ctx
            .attribution
            .attribution(
                event.base.tx_hash,
                OrderKind::AuctionHouse,
                Some(order_id.clone()),
            )
            .await?;
        let taker = attribution.taker.unwrap_or(decoded.winner);

        let prices = ctx
            .pricing
            .usd_and_native_price(decoded.currency, decoded.amount, event.base.timestamp)
            .await?;
        let Some(native_price) = prices.native_price else {
            return Ok(Err(SkipReason::MissingNativePrice));
        };

        Ok(Ok(FillEvent {
            kind: OrderKind::AuctionHouse,
            order_id: Some(order_id),
            side: OrderSide::Sell,
            maker: decoded.seller,
            taker,
            contract: decoded.tokenContract,
            token_id: decoded.tokenId,
            amount: U256::from(1),
            currency: decoded.currency,
            currency_price: decoded.amount,
            price: native_price,
            usd_price: prices.usd_price,
            base: event.base,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{context::NoAttribution, handlers::test_support::matched},
        model::NATIVE_CURRENCY,
        price_oracle::{MockUsdNativePricing, UsdNativePrice},
        std::sync::Arc,
    };

    fn context() -> HandlerContext {
        let mut pricing = MockUsdNativePricing::new();
        pricing
            .expect_usd_and_native_price()
            .returning(|_, amount, _| {
                Ok(UsdNativePrice {
                    usd_price: None,
                    native_price: Some(amount),
                })
            });
        HandlerContext::new(
            Arc::new(pricing),
            Arc::new(ethrpc::MockTraceFetching::new()),
            Arc::new(ethrpc::MockCallExecuting::new()),
            Arc::new(NoAttribution),
        )
    }

    #[tokio::test]
    async fn settlement_becomes_a_one_shot_fill() {
        let settled = abi::AuctionSettled {
            auctionId: U256::from(9),
            tokenId: U256::from(42),
            tokenContract: Address::with_last_byte(7),
            seller: Address::with_last_byte(1),
            winner: Address::with_last_byte(2),
            amount: U256::from(5_000),
            currency: NATIVE_CURRENCY,
        };
        let house = Address::with_last_byte(0xaa);
        let event = matched(EventSubKind::AuctionSettled, house, &settled, 0);
        let data = AuctionHouse
            .handle(&[event], &context(), &Default::default())
            .await
            .unwrap();

        assert_eq!(data.fills.len(), 1);
        let fill = &data.fills[0];
        assert_eq!(fill.kind, OrderKind::AuctionHouse);
        assert_eq!(fill.side, OrderSide::Sell);
        assert_eq!(fill.maker, Address::with_last_byte(1));
        assert_eq!(fill.taker, Address::with_last_byte(2));
        assert_eq!(fill.price, U256::from(5_000));
        assert_eq!(
            fill.order_id.as_deref(),
            Some(auction_order_id(house, U256::from(9)).as_str())
        );
    }

    #[tokio::test]
    async fn cancellation_references_the_same_order_id() {
        let house = Address::with_last_byte(0xaa);
        let cancelled = abi::AuctionCancelled {
            auctionId: U256::from(9),
            tokenId: U256::from(42),
            tokenContract: Address::with_last_byte(7),
            seller: Address::with_last_byte(1),
        };
        let event = matched(EventSubKind::AuctionCancelled, house, &cancelled, 0);
        let data = AuctionHouse
            .handle(&[event], &context(), &Default::default())
            .await
            .unwrap();

        assert_eq!(data.cancels.len(), 1);
        assert_eq!(
            data.cancels[0].order_id,
            auction_order_id(house, U256::from(9))
        );
    }
}
