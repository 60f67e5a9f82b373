use {
    crate::order::OrderKind,
    alloy_primitives::{Address, B256, U256},
    serde::{Deserialize, Serialize},
};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OrderSide {
    Buy,
    #[default]
    Sell,
}

/// Uniquely identifies the on-chain origin of a canonical event.
///
/// `(tx_hash, log_index, batch_index, block_hash)` is the natural
/// deduplication key: a single log can yield several canonical events
/// (distinguished by `batch_index`) and the same `(block, log)` position
/// can reappear under a different hash after a reorg.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BaseEventParams {
    pub address: Address,
    pub block: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub log_index: u64,
    pub batch_index: u64,
    pub timestamp: u64,
}

/// A royalty or marketplace fee share attributed to a single recipient.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FeeRecipient {
    pub recipient: Address,
    pub bps: u16,
}

/// A canonical sale. Immutable once written except for `is_deleted`
/// (reorg soft-delete) and the royalty fields (asynchronous enrichment).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub kind: OrderKind,
    pub order_id: Option<String>,
    pub side: OrderSide,
    pub maker: Address,
    pub taker: Address,
    pub contract: Address,
    pub token_id: U256,
    pub amount: U256,
    pub currency: Address,
    /// Unit price denominated in `currency`.
    pub currency_price: U256,
    /// Unit price denominated in the chain's native currency.
    pub price: U256,
    /// Unit price in USD, fixed point with [`crate::royalty::USD_DECIMALS`]
    /// fractional digits. Absent when no USD sample was resolvable.
    pub usd_price: Option<U256>,
    pub royalty_fee_bps: Option<u16>,
    pub marketplace_fee_bps: Option<u16>,
    pub royalty_fee_breakdown: Vec<FeeRecipient>,
    pub marketplace_fee_breakdown: Vec<FeeRecipient>,
    pub paid_full_royalty: Option<bool>,
    /// Price minus all attributed fees, set during royalty enrichment.
    pub net_amount: Option<U256>,
    pub is_deleted: bool,
    pub base: BaseEventParams,
}

impl FillEvent {
    /// Mints are sales out of thin air; they carry no royalty obligations.
    pub fn is_mint(&self) -> bool {
        self.maker == Address::ZERO
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CancelEvent {
    pub kind: OrderKind,
    pub order_id: String,
    pub maker: Address,
    pub base: BaseEventParams,
}

/// Cancellation of every order by `maker` with a nonce below `min_nonce`.
/// Affected orders are invalidated lazily by the validity checker, not by
/// a fan-out write.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BulkCancelEvent {
    pub kind: OrderKind,
    pub maker: Address,
    pub min_nonce: U256,
    pub base: BaseEventParams,
}

/// An order whose existence was discovered on-chain (e.g. an AMM pool
/// quote reconstructed from a trace) rather than through off-chain
/// submission.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct OnChainOrderInfo {
    pub id: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub maker: Address,
    pub contract: Address,
    pub token_id: U256,
    pub amount: U256,
    pub currency: Address,
    pub price: U256,
    pub valid_from: u64,
    pub valid_until: u64,
    pub source: Option<String>,
}
