//! Hex quantities and decimal formatting.

use alloy_primitives::U256;
use alloy_primitives::utils;

use crate::error::ChainError;

pub const ETHER_DECIMALS: u8 = 18;

/// Decode a JSON-RPC quantity (`0x`-prefixed, big-endian hex).
pub fn parse_quantity(raw: &str) -> Result<U256, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| ChainError::InvalidResponse(format!("quantity without 0x prefix: {raw}")))?;
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse("empty quantity".into()));
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity {raw}: {e}")))
}

/// [`parse_quantity`] narrowed to `u64` (block numbers, chain ids).
pub fn parse_u64_quantity(raw: &str) -> Result<u64, ChainError> {
    let value = parse_quantity(raw)?;
    u64::try_from(value)
        .map_err(|_| ChainError::InvalidResponse(format!("quantity exceeds u64: {raw}")))
}

/// Encode a `u64` as a JSON-RPC quantity.
pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Render `value` scaled down by `10^decimals`.
///
/// Trailing zeros are trimmed but one fractional digit is always kept, so
/// `0` renders as `"0.0"` and `1_500_000_000_000_000_000` with 18 decimals as
/// `"1.5"`.
pub fn format_units(value: U256, decimals: u8) -> Result<String, ChainError> {
    let formatted = utils::format_units(value, decimals).map_err(|e| {
        ChainError::InvalidResponse(format!("cannot scale by {decimals} decimals: {e}"))
    })?;
    Ok(trim_fraction(&formatted))
}

/// Wei to ether.
pub fn format_ether(wei: U256) -> String {
    trim_fraction(&utils::format_ether(wei))
}

fn trim_fraction(formatted: &str) -> String {
    match formatted.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{frac}")
            }
        }
        None => format!("{formatted}.0"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(value: u128) -> U256 {
        U256::from(value)
    }

    #[test]
    fn parses_block_numbers() {
        assert_eq!(parse_u64_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_u64_quantity("0x10d4f").unwrap(), 68_943);
        assert_eq!(parse_u64_quantity("0x00ff").unwrap(), 255);
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert!(parse_quantity("10").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn quantities_use_the_full_word() {
        let max = format!("0x{}", "f".repeat(64));
        assert_eq!(parse_quantity(&max).unwrap(), U256::MAX);
        let above_u128 = format!("0x1{}", "0".repeat(32));
        assert_eq!(parse_quantity(&above_u128).unwrap(), U256::from(1u64) << 128usize);
        let padded = format!("0x{}1", "0".repeat(63));
        assert_eq!(parse_quantity(&padded).unwrap(), U256::from(1u64));

        let too_wide = format!("0x1{}", "0".repeat(64));
        assert!(parse_quantity(&too_wide).is_err());
    }

    #[test]
    fn u64_narrowing() {
        assert!(parse_u64_quantity("0x10000000000000000").is_err());
        assert_eq!(parse_u64_quantity("0xffffffffffffffff").unwrap(), u64::MAX);
    }

    #[test]
    fn quantity_encoding() {
        assert_eq!(to_quantity(0), "0x0");
        assert_eq!(to_quantity(17_000_000), "0x1036640");
    }

    #[test]
    fn formats_ether_like_ethers() {
        assert_eq!(format_ether(U256::ZERO), "0.0");
        assert_eq!(format_ether(wei(1_000_000_000_000_000_000)), "1.0");
        assert_eq!(format_ether(wei(1_500_000_000_000_000_000)), "1.5");
        assert_eq!(format_ether(wei(1)), "0.000000000000000001");
        assert_eq!(format_ether(wei(123_456_789_000_000_000_000)), "123.456789");
    }

    #[test]
    fn formats_other_decimals() {
        assert_eq!(format_units(wei(1_234_567), 6).unwrap(), "1.234567");
        assert_eq!(format_units(wei(500), 0).unwrap(), "500.0");
        assert_eq!(format_units(wei(5), 2).unwrap(), "0.05");
    }

    #[test]
    fn formats_values_above_u128() {
        let big = U256::from(u128::MAX) * U256::from(1_000u64);
        let expected_whole = (U256::from(u128::MAX) / U256::from(1_000_000_000_000_000u64)).to_string();
        let formatted = format_units(big, 18).unwrap();
        assert!(formatted.starts_with(&format!("{expected_whole}.")), "{formatted}");
    }

    #[test]
    fn rejects_impossible_decimals() {
        assert!(format_units(wei(1), 78).is_err());
    }
}
