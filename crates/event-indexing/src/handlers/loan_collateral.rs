//! Lending liquidations: a defaulted loan's collateral passing to the
//! lender is a sale at the outstanding debt.

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
        events::{FillEvent, OrderSide},
        order::OrderKind,
    },
};

mod abi {
    alloy_sol_types::sol! {
        #[derive(Debug)]
        event CollateralSeized(
            uint256 indexed loanId,
            address indexed borrower,
            address indexed lender,
            address collection,
            uint256 tokenId,
            address currency,
            uint256 debtAmount
        );
    }
}

fn loan_order_id(lending: Address, loan_id: U256) -> String {
    let mut preimage = Vec::with_capacity(67);
    preimage.extend_from_slice(b"loan-collateral");
    preimage.extend_from_slice(lending.as_slice());
    preimage.extend_from_slice(&loan_id.to_be_bytes::<32>());
    keccak256(preimage).to_string()
}

pub struct LoanCollateral;

#[async_trait]
impl ProtocolHandler for LoanCollateral {
    fn kind(&self) -> OrderKind {
        OrderKind::LoanCollateral
    }

    fn descriptors(&self) -> Vec<EventDescriptor> {
        vec![EventDescriptor {
            kind: OrderKind::LoanCollateral,
            sub_kind: EventSubKind::CollateralSeized,
            topic: abi::CollateralSeized::SIGNATURE_HASH,
            num_topics: 4,
            address_filter: None,
        }]
    }

    async fn handle(
        &self,
        events: &[MatchedEvent],
        ctx: &HandlerContext,
        _occurrences: &CallOccurrences,
    ) -> Result<OnChainData> {
        let mut data = OnChainData::default();
        for event in events {
            match self.seizure(event, ctx).await? {
                Ok(fill) => data.fills.push(fill),
                Err(reason) => {
                    ctx.record_skip(&reason, event.base.tx_hash, Some(event.base.log_index))
                }
            }
        }
        Ok(data)
    }
}

impl LoanCollateral {
    async fn seizure(
        &self,
        event: &MatchedEvent,
        ctx: &HandlerContext,
    ) -> Result<Result<FillEvent, SkipReason>> {
        let decoded = match event.log.log_decode::<abi::CollateralSeized>() {
            Ok(log) => log.data().clone(),
            Err(_) => return Ok(Err(SkipReason::MalformedLog)),
        };

        let order_id = loan_order_id(event.base.address, decoded.loanId);
        let attribution = ctx
            .attribution
            .attribution(
                event.base.tx_hash,
                OrderKind::LoanCollateral,
                Some(order_id.clone()),
            )
            .await?;

        let prices = ctx
            .pricing
            .usd_and_native_price(decoded.currency, decoded.debtAmount, event.base.timestamp)
            .await?;
        let Some(native_price) = prices.native_price else {
            return Ok(Err(SkipReason::MissingNativePrice));
        };

        Ok(Ok(FillEvent {
            kind: OrderKind::LoanCollateral,
            order_id: Some(order_id),
            // A liquidation is a forced sale by the borrower.
            side: OrderSide::Sell,
            maker: decoded.borrower,
            taker: attribution.taker.unwrap_or(decoded.lender),
            contract: decoded.collection,
            token_id: decoded.tokenId,
            amount: U256::from(1),
            currency: decoded.currency,
            currency_price: decoded.debtAmount,
            price: native_price,
            usd_price: prices.usd_price,
            base: event.base,
            ..Default::default()
        }))
    }
}
