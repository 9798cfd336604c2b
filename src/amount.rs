//! Arbitrary-precision monetary amounts
//!
//! Every on-chain quantity (wei balances, rates, lockups, commissions) is an
//! arbitrary-precision integer. Floating point is never used for money.
//! Amounts are signed: settlement timing can briefly drive a user balance
//! below zero and the engine must absorb that without panicking, while usage
//! counters are clamped back to zero after every subtraction.
//!
//! SQLite stores amounts as base-10 TEXT columns; the JSONL event feed and
//! the query surface carry them as base-10 strings for full precision.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

pub type Amount = BigInt;

/// Zero amount, for initializing fresh entity counters.
pub fn zero() -> Amount {
    BigInt::zero()
}

/// Clamp a running counter back to zero after a subtraction.
///
/// Usage and lockup counters are maintained as running add/subtract and the
/// floor at zero is required steady-state behavior, not an error path.
pub fn clamp_non_negative(value: Amount) -> Amount {
    if value.is_negative() {
        BigInt::zero()
    } else {
        value
    }
}

/// Subtract with a zero floor (usage counters must never report negative).
pub fn sub_clamped(lhs: &Amount, rhs: &Amount) -> Amount {
    clamp_non_negative(lhs - rhs)
}

/// Render an amount as a base-10 string for TEXT storage and query output.
pub fn to_text(value: &Amount) -> String {
    value.to_str_radix(10)
}

/// Parse a base-10 TEXT column back into an amount.
pub fn from_text(text: &str) -> Option<Amount> {
    BigInt::parse_bytes(text.trim().as_bytes(), 10)
}

/// Serde adapter serializing amounts as base-10 strings.
///
/// Used on every event and query-row field holding an `Amount`, so JSON never
/// sees a numeric type that could silently lose precision.
pub mod serde_string {
    use super::{from_text, to_text, Amount};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_text(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let text = String::deserialize(deserializer)?;
        from_text(&text).ok_or_else(|| D::Error::custom(format!("invalid amount: {}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        let wei = from_text("340282366920938463463374607431768211456").unwrap();
        assert_eq!(to_text(&wei), "340282366920938463463374607431768211456");
    }

    #[test]
    fn test_negative_text_round_trip() {
        let v = from_text("-42").unwrap();
        assert_eq!(to_text(&v), "-42");
    }

    #[test]
    fn test_sub_clamped_floors_at_zero() {
        let a = from_text("100").unwrap();
        let b = from_text("250").unwrap();
        assert_eq!(sub_clamped(&a, &b), zero());
        assert_eq!(sub_clamped(&b, &a), from_text("150").unwrap());
    }

    #[test]
    fn test_from_text_rejects_garbage() {
        assert!(from_text("not-a-number").is_none());
        assert!(from_text("").is_none());
    }
}
