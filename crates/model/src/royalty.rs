use {
    crate::events::FeeRecipient,
    serde::{Deserialize, Serialize},
};

/// Fee denominator: fees are expressed in basis points out of 10000.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Fixed-point fractional digits carried by USD amounts.
pub const USD_DECIMALS: u32 = 6;

/// The outcome of running a royalty adapter over a fill event.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RoyaltyResult {
    pub royalty_fee_bps: u16,
    pub marketplace_fee_bps: u16,
    pub royalty_fee_breakdown: Vec<FeeRecipient>,
    pub marketplace_fee_breakdown: Vec<FeeRecipient>,
    pub paid_full_royalty: bool,
}

impl RoyaltyResult {
    pub fn total_bps(&self) -> u32 {
        u32::from(self.royalty_fee_bps) + u32::from(self.marketplace_fee_bps)
    }

    /// A result claiming fees at or above 100% is bogus and must be
    /// discarded rather than applied.
    pub fn is_valid(&self) -> bool {
        self.total_bps() < BPS_DENOMINATOR
    }
}
