use {
    crate::events::OrderSide,
    alloy_primitives::{Address, U256},
    serde::{Deserialize, Serialize},
};

/// The marketplace protocol family an order belongs to. Doubles as the
/// dispatch key for protocol handlers and royalty adapters.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OrderKind {
    /// Off-chain signed orders settled through an on-chain order book
    /// exchange.
    #[default]
    OrderBook,
    /// Pool-based exchange where the pool itself is the maker.
    AmmPool,
    /// Reserve auctions settled by an auction house contract.
    AuctionHouse,
    /// Lending-protocol collateral seizures settled as sales.
    LoanCollateral,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FillabilityStatus {
    #[default]
    Fillable,
    NoBalance,
    Filled,
    Cancelled,
    Expired,
}

impl FillabilityStatus {
    /// Terminal states are never left again except through an explicit
    /// revalidation trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Expired)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TokenStandard {
    Erc721,
    Erc1155,
}

/// The order aggregate mutated by the fill/cancel event store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub kind: OrderKind,
    pub fillability_status: FillabilityStatus,
    pub quantity_filled: U256,
    pub quantity_remaining: U256,
    pub valid_from: u64,
    pub valid_until: u64,
    /// Chain position of the most recent write applied to this order.
    /// Writes that are causally older than this position are rejected.
    pub block_number: u64,
    pub log_index: u64,
    pub source: Option<String>,
    /// Kind-specific payload; decoded by the validity checker.
    pub data: serde_json::Value,
}

/// The shape every order payload must decode into before it can be
/// validated. Orders that do not decode are reported `unknown-format`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub maker: Address,
    pub side: OrderSide,
    pub contract: Address,
    pub token_id: U256,
    pub token_kind: TokenStandard,
    /// Total price for `amount` units.
    pub price: U256,
    pub amount: U256,
    pub currency: Address,
    pub nonce: U256,
    /// Operator contract permitted to move the maker's assets. Absent for
    /// protocols where the exchange itself is the operator.
    pub conduit: Option<Address>,
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    #[test]
    fn order_kind_string_round_trip() {
        for kind in <OrderKind as strum::IntoEnumIterator>::iter() {
            let as_str = kind.to_string();
            assert_eq!(OrderKind::from_str(&as_str).unwrap(), kind);
        }
        assert_eq!(OrderKind::OrderBook.to_string(), "order-book");
        assert_eq!(OrderKind::AmmPool.as_ref(), "amm-pool");
    }

    #[test]
    fn fillability_status_terminality() {
        assert!(!FillabilityStatus::Fillable.is_terminal());
        assert!(!FillabilityStatus::NoBalance.is_terminal());
        assert!(FillabilityStatus::Filled.is_terminal());
        assert!(FillabilityStatus::Cancelled.is_terminal());
        assert!(FillabilityStatus::Expired.is_terminal());
    }

    #[test]
    fn status_matches_database_text() {
        assert_eq!(FillabilityStatus::NoBalance.as_ref(), "no-balance");
        assert_eq!(
            FillabilityStatus::from_str("no-balance").unwrap(),
            FillabilityStatus::NoBalance
        );
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = OrderPayload {
            maker: Address::with_last_byte(1),
            side: OrderSide::Sell,
            contract: Address::with_last_byte(2),
            token_id: U256::from(42),
            token_kind: TokenStandard::Erc721,
            price: U256::from(1_500_000_000_000_000_000u128),
            amount: U256::from(1),
            currency: crate::NATIVE_CURRENCY,
            nonce: U256::ZERO,
            conduit: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        let decoded: OrderPayload = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.token_id, payload.token_id);
        assert_eq!(decoded.token_kind, TokenStandard::Erc721);
    }
}
