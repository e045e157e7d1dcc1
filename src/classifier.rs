//! Transfer event classification and amount normalization.
//!
//! Both functions are pure: no I/O, no shared state, deterministic output
//! for a given input. Classification is a priority list of mutually
//! exclusive zero-address checks; amount normalization is exact integer
//! division, never floating point.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{TransactionType, TransferLog};

/// USDC carries a fixed 6 decimal places on every chain.
pub const USDC_DECIMALS: u32 = 6;

/// Assign a semantic kind to a decoded Transfer event.
///
/// Order matters: a mint check wins over a burn check, so a pathological
/// zero-to-zero transfer classifies as a mint.
pub fn classify(log: &TransferLog) -> TransactionType {
    if log.from.is_zero() {
        TransactionType::CircleMint
    } else if log.to.is_zero() {
        TransactionType::CircleBurn
    } else {
        TransactionType::Other
    }
}

/// Convert a raw token amount into an exact decimal with 6 fractional
/// digits.
///
/// The division is done in integer space (quotient and remainder against
/// 10^6) and the result constructed from the decimal string, so no
/// precision is lost regardless of magnitude. Values whose integer part
/// exceeds `Decimal`'s 28-digit mantissa are rejected.
pub fn normalize_amount(raw: U256) -> Result<Decimal, rust_decimal::Error> {
    let divisor = U256::exp10(USDC_DECIMALS as usize);
    let integer = raw / divisor;
    let fraction = raw % divisor;
    let repr = format!("{}.{:0>6}", integer, fraction.to_string());
    Decimal::from_str(&repr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    fn log(from: Address, to: Address, raw: u64) -> TransferLog {
        TransferLog {
            tx_hash: H256::repeat_byte(0x11),
            block_number: 100,
            log_index: 0,
            from,
            to,
            raw_amount: U256::from(raw),
            block_timestamp: 1_700_000_000,
        }
    }

    fn random_nonzero_address(rng: &mut StdRng) -> Address {
        loop {
            let mut bytes = [0u8; 20];
            rng.fill(&mut bytes);
            let addr = Address::from(bytes);
            if !addr.is_zero() {
                return addr;
            }
        }
    }

    #[test]
    fn zero_sender_is_mint() {
        let l = log(Address::zero(), Address::repeat_byte(0xaa), 1);
        assert_eq!(classify(&l), TransactionType::CircleMint);
    }

    #[test]
    fn zero_recipient_is_burn() {
        let l = log(Address::repeat_byte(0xbb), Address::zero(), 1);
        assert_eq!(classify(&l), TransactionType::CircleBurn);
    }

    #[test]
    fn ordinary_transfer_is_other() {
        let l = log(Address::repeat_byte(0xcc), Address::repeat_byte(0xdd), 1);
        assert_eq!(classify(&l), TransactionType::Other);
    }

    #[test]
    fn mint_check_takes_priority_over_burn() {
        let l = log(Address::zero(), Address::zero(), 1);
        assert_eq!(classify(&l), TransactionType::CircleMint);
    }

    #[test]
    fn classification_over_random_addresses() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let from = random_nonzero_address(&mut rng);
            let to = random_nonzero_address(&mut rng);
            assert_eq!(classify(&log(from, to, 1)), TransactionType::Other);
            assert_eq!(
                classify(&log(Address::zero(), to, 1)),
                TransactionType::CircleMint
            );
            assert_eq!(
                classify(&log(from, Address::zero(), 1)),
                TransactionType::CircleBurn
            );
        }
    }

    #[test]
    fn normalizes_smallest_unit() {
        let amount = normalize_amount(U256::from(1u64)).unwrap();
        assert_eq!(amount.to_string(), "0.000001");
    }

    #[test]
    fn normalizes_one_usdc() {
        let amount = normalize_amount(U256::from(1_000_000u64)).unwrap();
        assert_eq!(amount.to_string(), "1.000000");
    }

    #[test]
    fn normalizes_zero() {
        let amount = normalize_amount(U256::zero()).unwrap();
        assert_eq!(amount.to_string(), "0.000000");
    }

    #[test]
    fn normalizes_large_amount_without_drift() {
        let raw = U256::from_dec_str("123456789012345678").unwrap();
        let amount = normalize_amount(raw).unwrap();
        assert_eq!(amount.to_string(), "123456789012.345678");
    }

    #[test]
    fn normalizes_24_digit_amount_exactly() {
        let raw = U256::from_dec_str("999999999999999999999999").unwrap();
        let amount = normalize_amount(raw).unwrap();
        assert_eq!(amount.to_string(), "999999999999999999.999999");
    }

    #[test]
    fn rejects_amount_beyond_decimal_range() {
        assert!(normalize_amount(U256::MAX).is_err());
    }
}
