//! Canonical domain model shared by the indexing pipeline, the order
//! validity checker and the royalty engine.

pub mod events;
pub mod order;
pub mod royalty;

use alloy_primitives::Address;

/// Sentinel address used for the chain's native currency wherever a
/// currency address is expected.
pub const NATIVE_CURRENCY: Address = Address::ZERO;
