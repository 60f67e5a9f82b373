use {
    alloy_primitives::U256,
    anyhow::{Context, Result, ensure},
    bigdecimal::{BigDecimal, num_bigint::ToBigInt},
    num::{BigInt, BigUint, bigint::Sign},
};

pub fn u256_to_big_uint(input: &U256) -> BigUint {
    BigUint::from_bytes_be(&input.to_be_bytes::<32>())
}

pub fn u256_to_big_int(input: &U256) -> BigInt {
    BigInt::from_biguint(Sign::Plus, u256_to_big_uint(input))
}

pub fn big_uint_to_u256(input: &BigUint) -> Result<U256> {
    let bytes = input.to_bytes_be();
    ensure!(bytes.len() <= 32, "too large");
    Ok(U256::from_be_slice(&bytes))
}

pub fn big_int_to_u256(input: &BigInt) -> Result<U256> {
    ensure!(input.sign() != Sign::Minus, "negative");
    big_uint_to_u256(input.magnitude())
}

pub fn u256_to_big_decimal(u256: &U256) -> BigDecimal {
    let big_uint = u256_to_big_uint(u256);
    BigDecimal::from(BigInt::from(big_uint))
}

pub fn big_decimal_to_big_uint(big_decimal: &BigDecimal) -> Option<BigUint> {
    big_decimal.to_bigint()?.try_into().ok()
}

pub fn big_decimal_to_u256(big_decimal: &BigDecimal) -> Option<U256> {
    if !big_decimal.is_integer() {
        return None;
    }
    let big_int = big_decimal.to_bigint()?;
    big_int_to_u256(&big_int).ok()
}

/// Scales a decimal value (e.g. a USD price quoted as `1234.56`) into an
/// integer carrying `scale` fractional digits, truncating anything beyond
/// that precision.
pub fn big_decimal_to_scaled_u256(value: &BigDecimal, scale: u32) -> Option<U256> {
    let scaled = value * BigDecimal::from(BigInt::from(10u8).pow(scale));
    let big_int = scaled.to_bigint()?;
    big_int_to_u256(&big_int).ok()
}

pub fn u256_decimal_fraction(value: &U256, scale: u32) -> BigDecimal {
    BigDecimal::new(u256_to_big_int(value), i64::from(scale))
}

pub fn big_decimal_from_str(s: &str) -> Result<BigDecimal> {
    s.parse().context("unable to parse decimal")
}

/// Saturating `u64` → `i64` for signed database columns.
pub fn u64_to_i64(value: u64) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}
