//! ERC-20 balance queries through `eth_call`.
//!
//! Only `balanceOf(address)` and `decimals()` are encoded; both take at most
//! one static argument, so the calldata is built by hand.

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::error::ChainError;
use crate::rpc::JsonRpcClient;
use crate::units::format_units;

/// `keccak256("balanceOf(address)")[..4]`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `keccak256("decimals()")[..4]`
pub const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

const WORD_LEN: usize = 32;

/// Parse a `0x`-prefixed 20-byte hex address. Checksum casing is not
/// verified.
pub fn parse_address(raw: &str) -> Result<Address, ChainError> {
    if !raw.starts_with("0x") {
        return Err(ChainError::InvalidAddress(raw.to_string()));
    }
    Address::from_str(raw).map_err(|_| ChainError::InvalidAddress(raw.to_string()))
}

/// Calldata for `balanceOf(owner)`.
pub fn balance_of_calldata(owner: &str) -> Result<String, ChainError> {
    let address = parse_address(owner)?;
    let mut data = Vec::with_capacity(4 + WORD_LEN);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(address.as_slice());
    Ok(format!("0x{}", hex::encode(data)))
}

/// Calldata for `decimals()`.
pub fn decimals_calldata() -> String {
    format!("0x{}", hex::encode(DECIMALS_SELECTOR))
}

/// Decode the first 32-byte word of return data as a `uint256`.
pub fn decode_uint(return_data: &str) -> Result<U256, ChainError> {
    let digits = return_data.strip_prefix("0x").unwrap_or(return_data);
    if digits.is_empty() {
        return Err(ChainError::InvalidResponse(
            "empty return data; is the address a contract?".into(),
        ));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| ChainError::InvalidResponse(format!("bad return data: {e}")))?;
    if bytes.len() < WORD_LEN {
        return Err(ChainError::InvalidResponse(format!(
            "return data is {} bytes, expected {WORD_LEN}",
            bytes.len()
        )));
    }
    U256::try_from_be_slice(&bytes[..WORD_LEN])
        .ok_or_else(|| ChainError::InvalidResponse("return word wider than 256 bits".into()))
}

/// A token balance together with the token's decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Erc20Balance {
    pub token: String,
    pub owner: String,
    pub raw: U256,
    pub decimals: u8,
}

impl Erc20Balance {
    pub fn formatted(&self) -> Result<String, ChainError> {
        format_units(self.raw, self.decimals)
    }
}

/// Query `balanceOf(owner)` and `decimals()` on `token`.
pub async fn erc20_balance(
    client: &JsonRpcClient,
    token: &str,
    owner: &str,
) -> Result<Erc20Balance, ChainError> {
    parse_address(token)?;
    let raw = decode_uint(&client.call(token, &balance_of_calldata(owner)?).await?)?;
    let decimals = decode_uint(&client.call(token, &decimals_calldata()).await?)?;
    let decimals = u8::try_from(decimals)
        .map_err(|_| ChainError::InvalidResponse(format!("decimals out of range: {decimals}")))?;

    Ok(Erc20Balance {
        token: token.to_string(),
        owner: owner.to_string(),
        raw,
        decimals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINK_GOERLI: &str = "0x326c977e6efc84e512bb9c30f76e30c160ed06fb";

    #[test]
    fn parses_addresses() {
        let address = parse_address(LINK_GOERLI).unwrap();
        assert_eq!(address[0], 0x32);
        assert_eq!(address[19], 0xfb);
        // mixed-case input parses to the same address
        assert_eq!(
            parse_address("0x326C977E6efc84E512bB9C30f76E30c160eD06FB").unwrap(),
            address
        );
        assert!(parse_address("0x742d35Cc6634C0532925a3b844Bc9e7595f2bD18").is_ok());
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_address("326c977e6efc84e512bb9c30f76e30c160ed06fb").is_err());
        assert!(parse_address("0x326c977e").is_err());
        assert!(parse_address("0xzz6c977e6efc84e512bb9c30f76e30c160ed06fb").is_err());
        assert!(parse_address("unima.eth").is_err());
    }

    #[test]
    fn encodes_balance_of() {
        let data = balance_of_calldata(LINK_GOERLI).unwrap();
        assert_eq!(
            data,
            "0x70a08231000000000000000000000000326c977e6efc84e512bb9c30f76e30c160ed06fb"
        );
        assert_eq!(data.len(), 2 + 2 * (4 + 32));
    }

    #[test]
    fn encodes_decimals() {
        assert_eq!(decimals_calldata(), "0x313ce567");
    }

    #[test]
    fn decodes_uint_words() {
        let eighteen = format!("0x{:064x}", 18);
        assert_eq!(decode_uint(&eighteen).unwrap(), U256::from(18u64));

        let one_ether = format!("0x{:064x}", 1_000_000_000_000_000_000u128);
        assert_eq!(
            decode_uint(&one_ether).unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn decodes_full_uint256_balances() {
        let max = format!("0x{}", "f".repeat(64));
        assert_eq!(decode_uint(&max).unwrap(), U256::MAX);

        let high_byte = format!("0x01{}", "0".repeat(62));
        assert_eq!(decode_uint(&high_byte).unwrap(), U256::from(1u64) << 248usize);
    }

    #[test]
    fn decode_rejects_short_values() {
        assert!(decode_uint("0x").is_err());
        assert!(decode_uint("0x0012").is_err());
        assert!(decode_uint("0xnothex").is_err());
    }

    #[test]
    fn decode_reads_only_the_first_word() {
        let two_words = format!("0x{:064x}{:064x}", 7, 9);
        assert_eq!(decode_uint(&two_words).unwrap(), U256::from(7u64));
    }

    #[test]
    fn formats_balance_with_token_decimals() {
        let balance = Erc20Balance {
            token: LINK_GOERLI.into(),
            owner: "0x0000000000000000000000000000000000000001".into(),
            raw: U256::from(20_500_000u64),
            decimals: 6,
        };
        assert_eq!(balance.formatted().unwrap(), "20.5");
    }

    #[test]
    fn formats_balance_above_u128() {
        let balance = Erc20Balance {
            token: LINK_GOERLI.into(),
            owner: "0x0000000000000000000000000000000000000001".into(),
            raw: U256::MAX,
            decimals: 18,
        };
        let formatted = balance.formatted().unwrap();
        assert!(formatted.starts_with("115792089237316195423570985008687907853269984665640564039457."));
    }
}
