//! Order-book exchange: off-chain signed orders settled on-chain. The
//! fulfillment event carries the full offer/consideration breakdown, so
//! no trace inspection is needed. Orders support partial fills.

use {
    crate::{
        accumulator::OnChainData,
        context::{CallOccurrences, HandlerContext, SkipReason},
        handlers::{MatchedEvent, ProtocolHandler},
        matcher::{EventDescriptor, EventSubKind},
    },
    alloy_primitives::{Address, U256},
    alloy_sol_types::SolEvent,
    anyhow::Result,
    async_trait::async_trait,
    model::{
        NATIVE_CURRENCY,
        events::{BulkCancelEvent, CancelEvent, FillEvent, OrderSide},
        order::OrderKind,
    },
};

mod abi {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        struct SpentItem {
            uint8 itemType;
            address token;
            uint256 identifier;
            uint256 amount;
        }

        #[derive(Debug)]
        struct ReceivedItem {
            uint8 itemType;
            address token;
            uint256 identifier;
            uint256 amount;
            address recipient;
        }

        #[derive(Debug)]
        event OrderFulfilled(
            bytes32 orderHash,
            address indexed offerer,
            address indexed zone,
            address recipient,
            SpentItem[] offer,
            ReceivedItem[] consideration
        );

        #[derive(Debug)]
        event OrderCancelled(bytes32 orderHash, address indexed offerer, address indexed zone);

        #[derive(Debug)]
        event CounterIncremented(uint256 newCounter, address indexed offerer);
    }
}

const ITEM_NATIVE: u8 = 0;
const ITEM_ERC20: u8 = 1;
const ITEM_ERC721: u8 = 2;
const ITEM_ERC1155: u8 = 3;

fn is_nft(item_type: u8) -> bool {
    matches!(item_type, ITEM_ERC721 | ITEM_ERC1155)
}

fn is_payment(item_type: u8) -> bool {
    matches!(item_type, ITEM_NATIVE | ITEM_ERC20)
}

/// `(item type, token, identifier, amount)` — the parts of an offer or
/// consideration item the fill derivation needs.
type Item = (u8, Address, U256, U256);

pub struct OrderBook;

#[async_trait]
impl ProtocolHandler for OrderBook {
    fn kind(&self) -> OrderKind {
        OrderKind::OrderBook
    }

    fn descriptors(&self) -> Vec<EventDescriptor> {
        vec![
            EventDescriptor {
                kind: OrderKind::OrderBook,
                sub_kind: EventSubKind::OrderFulfilled,
                topic: abi::OrderFulfilled::SIGNATURE_HASH,
                num_topics: 3,
                address_filter: None,
            },
            EventDescriptor {
                kind: OrderKind::OrderBook,
                sub_kind: EventSubKind::OrderCancelled,
                topic: abi::OrderCancelled::SIGNATURE_HASH,
                num_topics: 3,
                address_filter: None,
            },
            EventDescriptor {
                kind: OrderKind::OrderBook,
                sub_kind: EventSubKind::CounterIncremented,
                topic: abi::CounterIncremented::SIGNATURE_HASH,
                num_topics: 2,
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
                EventSubKind::OrderFulfilled => match self.fulfillment(event, ctx).await? {
                    Ok(fill) => data.partial_fills.push(fill),
                    Err(reason) => {
                        ctx.record_skip(&reason, event.base.tx_hash, Some(event.base.log_index))
                    }
                },
                EventSubKind::OrderCancelled => {
                    let Ok(decoded) = event.log.log_decode::<abi::OrderCancelled>() else {
                        ctx.record_skip(
                            &SkipReason::MalformedLog,
                            event.base.tx_hash,
                            Some(event.base.log_index),
                        );
                        continue;
                    };
                    data.cancels.push(CancelEvent {
                        kind: OrderKind::OrderBook,
                        order_id: decoded.data().orderHash.to_string(),
                        maker: decoded.data().offerer,
                        base: event.base,
                    });
                }
                EventSubKind::CounterIncremented => {
                    let Ok(decoded) = event.log.log_decode::<abi::CounterIncremented>() else {
                        ctx.record_skip(
                            &SkipReason::MalformedLog,
                            event.base.tx_hash,
                            Some(event.base.log_index),
                        );
                        continue;
                    };
                    data.bulk_cancels.push(BulkCancelEvent {
                        kind: OrderKind::OrderBook,
                        maker: decoded.data().offerer,
                        min_nonce: decoded.data().newCounter,
                        base: event.base,
                    });
                }
                _ => {}
            }
        }
        Ok(data)
    }
}

impl OrderBook {
    async fn fulfillment(
        &self,
        event: &MatchedEvent,
        ctx: &HandlerContext,
    ) -> Result<Result<FillEvent, SkipReason>> {
        let decoded = match event.log.log_decode::<abi::OrderFulfilled>() {
            Ok(log) => log.data().clone(),
            Err(_) => return Ok(Err(SkipReason::MalformedLog)),
        };

        let offer: Vec<Item> = decoded
            .offer
            .iter()
            .map(|item| (item.itemType, item.token, item.identifier, item.amount))
            .collect();
        let consideration: Vec<Item> = decoded
            .consideration
            .iter()
            .map(|item| (item.itemType, item.token, item.identifier, item.amount))
            .collect();

        // Whichever side of the trade carries the NFT decides the order's
        // side: NFT in the offer means the offerer listed it for sale.
        let (side, nft, payment) = if let Some(nft) =
            offer.iter().find(|item| is_nft(item.0)).copied()
        {
            (OrderSide::Sell, nft, consideration)
        } else if let Some(nft) = consideration.iter().find(|item| is_nft(item.0)).copied() {
            (OrderSide::Buy, nft, offer)
        } else {
            return Ok(Err(SkipReason::MalformedLog));
        };

        let (_, contract, token_id, amount) = nft;
        if amount.is_zero() {
            return Ok(Err(SkipReason::MalformedLog));
        }

        // The first payment item defines the currency; the total is the
        // sum over all items paid in it (price plus any fee items).
        let Some(first_payment) = payment.iter().find(|item| is_payment(item.0)).copied() else {
            return Ok(Err(SkipReason::MalformedLog));
        };
        let currency = match first_payment.0 {
            ITEM_NATIVE => NATIVE_CURRENCY,
            _ => first_payment.1,
        };
        let total: U256 = payment
            .iter()
            .filter(|item| item.0 == first_payment.0 && item.1 == first_payment.1)
            .fold(U256::ZERO, |acc, item| acc.saturating_add(item.3));
        let currency_price = total / amount;

        let order_id = decoded.orderHash.to_string();
        let attribution = ctx
            .attribution
            .attribution(
                event.base.tx_hash,
                OrderKind::OrderBook,
                Some(order_id.clone()),
            )
            .await?;
        let taker = attribution.taker.unwrap_or(decoded.recipient);

        let prices = ctx
            .pricing
            .usd_and_native_price(currency, currency_price, event.base.timestamp)
            .await?;
        // A fill that cannot be priced in the native currency is unusable
        // downstream and must never be persisted partially.
        let Some(native_price) = prices.native_price else {
            return Ok(Err(SkipReason::MissingNativePrice));
        };

        Ok(Ok(FillEvent {
            kind: OrderKind::OrderBook,
            order_id: Some(order_id),
            side,
            maker: decoded.offerer,
            taker,
            contract,
            token_id,
            amount,
            currency,
            currency_price,
            price: native_price,
            usd_price: prices.usd_price,
            base: event.base,
            ..Default::default()
        }))
    }
}
