//! Store-backed implementations of the validator's registry seams.
//! Nonces are derived from stored bulk-cancel events at read time; no
//! fan-out write to orders ever happens on bulk cancellation.

use {
    crate::{CancellationChecking, NonceProviding},
    alloy_primitives::{Address, U256},
    anyhow::{Context, Result},
    async_trait::async_trait,
    model::order::OrderKind,
    number::conversions::big_decimal_to_u256,
    sqlx::PgPool,
};

pub struct PgOrderState {
    pool: PgPool,
}

impl PgOrderState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceProviding for PgOrderState {
    async fn min_nonce(&self, maker: Address, kind: OrderKind) -> Result<U256> {
        let mut ex = self.pool.acquire().await?;
        let nonce = database::cancel_events::min_nonce(
            &mut ex,
            database::byte_array::ByteArray(maker.0.0),
            kind.as_ref(),
        )
        .await?;
        big_decimal_to_u256(&nonce).context("stored nonce is not a u256")
    }
}

#[async_trait]
impl CancellationChecking for PgOrderState {
    async fn is_cancelled(&self, order_id: &str) -> Result<bool> {
        let mut ex = self.pool.acquire().await?;
        Ok(database::cancel_events::is_cancelled(&mut ex, order_id).await?)
    }
}
