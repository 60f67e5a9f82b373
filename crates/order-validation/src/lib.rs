//! Off-chain verification of whether an order is still fillable.
//!
//! The checker never throws for an unfillable order: every way an order
//! can be dead is a typed [`InvalidOrder`] value. Genuine infrastructure
//! failures (store or node unreachable) surface as
//! [`ValidationError::Other`] and propagate to the caller's retry policy.

pub mod onchain;
pub mod storage;

use {
    alloy_primitives::{Address, U256},
    anyhow::Result,
    async_trait::async_trait,
    model::order::{Order, OrderKind, OrderPayload, TokenStandard},
    std::sync::Arc,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InvalidOrder {
    UnknownFormat,
    InvalidTarget,
    Cancelled,
    Filled,
    NoBalance,
    NoApproval,
    NoBalanceNoApproval,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("order is not fillable: {0}")]
    Invalid(InvalidOrder),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<InvalidOrder> for ValidationError {
    fn from(invalid: InvalidOrder) -> Self {
        Self::Invalid(invalid)
    }
}

/// Caller-controlled extent of the check.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationOptions {
    /// Also consult the cancellation registry and fill bookkeeping.
    pub check_liveness: bool,
    /// Re-verify approvals on-chain instead of trusting the local
    /// approval cache. Covers pre-approved exchanges the cache never saw.
    pub on_chain_approval: bool,
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait TokenClassifying: Send + Sync {
    /// The token standard a contract implements, if known.
    async fn classify(&self, contract: Address) -> Result<Option<TokenStandard>>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait NonceProviding: Send + Sync {
    /// The maker's current minimum valid nonce for the given order kind.
    async fn min_nonce(&self, maker: Address, kind: OrderKind) -> Result<U256>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait CancellationChecking: Send + Sync {
    async fn is_cancelled(&self, order_id: &str) -> Result<bool>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait BalanceFetching: Send + Sync {
    async fn erc20_balance(&self, owner: Address, token: Address) -> Result<U256>;
    async fn token_balance(
        &self,
        owner: Address,
        contract: Address,
        token_id: U256,
        standard: TokenStandard,
    ) -> Result<U256>;
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait ApprovalChecking: Send + Sync {
    async fn is_approved_for_all(
        &self,
        owner: Address,
        operator: Address,
        contract: Address,
    ) -> Result<bool>;

    /// ERC-721 single-token approval, used as a fallback when blanket
    /// approval is absent.
    async fn approved_for_token(
        &self,
        contract: Address,
        token_id: U256,
    ) -> Result<Option<Address>>;
}

pub struct OrderValidator {
    classifier: Arc<dyn TokenClassifying>,
    nonces: Arc<dyn NonceProviding>,
    cancellations: Arc<dyn CancellationChecking>,
    balances: Arc<dyn BalanceFetching>,
    approvals: Arc<dyn ApprovalChecking>,
    /// Operator assumed when the order does not name a conduit.
    default_operator: Address,
}

impl OrderValidator {
    pub fn new(
        classifier: Arc<dyn TokenClassifying>,
        nonces: Arc<dyn NonceProviding>,
        cancellations: Arc<dyn CancellationChecking>,
        balances: Arc<dyn BalanceFetching>,
        approvals: Arc<dyn ApprovalChecking>,
        default_operator: Address,
    ) -> Self {
        Self {
            classifier,
            nonces,
            cancellations,
            balances,
            approvals,
            default_operator,
        }
    }

    /// Runs the check sequence: format, target, liveness, nonce,
    /// balance/approval. The first failed check wins, except that balance
    /// and approval are both evaluated before raising so a caller can
    /// distinguish "needs approval" from "needs funds".
    pub async fn validate(
        &self,
        order: &Order,
        options: ValidationOptions,
    ) -> Result<(), ValidationError> {
        let payload = decode_payload(order)?;

        let standard = self
            .classifier
            .classify(payload.contract)
            .await?
            .ok_or(InvalidOrder::InvalidTarget)?;
        if standard != payload.token_kind {
            return Err(InvalidOrder::InvalidTarget.into());
        }

        // A zero remaining quantity means filled no matter what the rest
        // of the bookkeeping or the chain says; everything else would be a
        // false-positive fillability.
        if order.quantity_remaining.is_zero() {
            return Err(InvalidOrder::Filled.into());
        }
        if options.check_liveness {
            if self.cancellations.is_cancelled(&order.id).await? {
                return Err(InvalidOrder::Cancelled.into());
            }
            if order.quantity_filled >= payload.amount {
                return Err(InvalidOrder::Filled.into());
            }
        }

        let min_nonce = self.nonces.min_nonce(payload.maker, order.kind).await?;
        if payload.nonce != min_nonce {
            return Err(InvalidOrder::Cancelled.into());
        }

        match payload.side {
            model::events::OrderSide::Buy => self.check_buy_side(order, &payload).await,
            model::events::OrderSide::Sell => {
                self.check_sell_side(order, &payload, options).await
            }
        }
    }

    async fn check_buy_side(
        &self,
        order: &Order,
        payload: &OrderPayload,
    ) -> Result<(), ValidationError> {
        let needed = unit_price_times(payload, order.quantity_remaining)
            .ok_or(InvalidOrder::UnknownFormat)?;
        let balance = self
            .balances
            .erc20_balance(payload.maker, payload.currency)
            .await?;
        if balance < needed {
            return Err(InvalidOrder::NoBalance.into());
        }
        Ok(())
    }

    async fn check_sell_side(
        &self,
        order: &Order,
        payload: &OrderPayload,
        options: ValidationOptions,
    ) -> Result<(), ValidationError> {
        let balance = self
            .balances
            .token_balance(
                payload.maker,
                payload.contract,
                payload.token_id,
                payload.token_kind,
            )
            .await?;
        let no_balance = balance < order.quantity_remaining;

        let operator = payload.conduit.unwrap_or(self.default_operator);
        let mut approved = self
            .approvals
            .is_approved_for_all(payload.maker, operator, payload.contract)
            .await?;
        if !approved
            && options.on_chain_approval
            && payload.token_kind == TokenStandard::Erc721
        {
            approved = self
                .approvals
                .approved_for_token(payload.contract, payload.token_id)
                .await?
                == Some(operator);
        }

        match (no_balance, !approved) {
            (false, false) => Ok(()),
            (true, false) => Err(InvalidOrder::NoBalance.into()),
            (false, true) => Err(InvalidOrder::NoApproval.into()),
            (true, true) => Err(InvalidOrder::NoBalanceNoApproval.into()),
        }
    }
}

fn decode_payload(order: &Order) -> Result<OrderPayload, ValidationError> {
    let payload: OrderPayload = serde_json::from_value(order.data.clone())
        .map_err(|_| InvalidOrder::UnknownFormat)?;
    if payload.amount.is_zero() {
        return Err(InvalidOrder::UnknownFormat.into());
    }
    Ok(payload)
}

/// `price / amount × quantity`, computed without losing precision to the
/// intermediate division.
fn unit_price_times(payload: &OrderPayload, quantity: U256) -> Option<U256> {
    payload
        .price
        .checked_mul(quantity)
        .map(|total| total / payload.amount)
}
