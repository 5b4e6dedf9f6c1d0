use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Number of fractional decimal digits carried by an [`Amount`]
pub const DECIMALS: usize = 8;

/// Base units in one whole coin
pub const BASE_UNITS_PER_COIN: u64 = 100_000_000;

/// Errors that can occur while parsing or combining amounts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount has more than {DECIMALS} fractional digits: {0}")]
    TooPrecise(String),

    #[error("Amount overflow")]
    Overflow,
}

/// A non-negative fixed-precision coin amount.
///
/// Stored as a count of base units (10^-8 of a coin) so repeated additions never
/// drift. The textual form is always `<whole>.<8 digits>`, which is also the form
/// used inside block hashes and transfer messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_base_units(units: u64) -> Self {
        Amount(units)
    }

    pub const fn base_units(self) -> u64 {
        self.0
    }

    /// Creates an amount of whole coins
    pub fn from_coins(coins: u64) -> Option<Self> {
        coins.checked_mul(BASE_UNITS_PER_COIN).map(Amount)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// Converts a signed running total in base units, flooring negatives at zero.
    /// A total too large for an amount is an error, never clamped.
    pub(crate) fn from_signed_total(total: i128) -> Result<Self, AmountError> {
        if total <= 0 {
            return Ok(Amount::ZERO);
        }
        u64::try_from(total)
            .map(Amount)
            .map_err(|_| AmountError::Overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / BASE_UNITS_PER_COIN,
            self.0 % BASE_UNITS_PER_COIN,
            width = DECIMALS
        )
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, fraction) = match s.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (s, ""),
        };

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
            return Err(AmountError::Invalid(s.to_string()));
        }
        if fraction.len() > DECIMALS {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u64>()
                .map_err(|_| AmountError::Overflow)?
                .checked_mul(BASE_UNITS_PER_COIN)
                .ok_or(AmountError::Overflow)?
        };

        let fraction_units = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", fraction, width = DECIMALS);
            padded
                .parse::<u64>()
                .map_err(|_| AmountError::Invalid(s.to_string()))?
        };

        whole_units
            .checked_add(fraction_units)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_is_fixed_width() {
        assert_eq!(Amount::from_coins(50).unwrap().to_string(), "50.00000000");
        assert_eq!(Amount::from_base_units(1).to_string(), "0.00000001");
        assert_eq!(Amount::ZERO.to_string(), "0.00000000");
    }

    #[test]
    fn test_parse_accepts_partial_fractions() {
        assert_eq!("10.5".parse::<Amount>().unwrap(), Amount::from_base_units(1_050_000_000));
        assert_eq!("40".parse::<Amount>().unwrap(), Amount::from_coins(40).unwrap());
        assert_eq!(".25".parse::<Amount>().unwrap(), Amount::from_base_units(25_000_000));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("".parse::<Amount>(), Err(AmountError::Empty));
        assert!(matches!("-1".parse::<Amount>(), Err(AmountError::Invalid(_))));
        assert!(matches!("1.2.3".parse::<Amount>(), Err(AmountError::Invalid(_))));
        assert!(matches!(".".parse::<Amount>(), Err(AmountError::Invalid(_))));
        assert!(matches!("0.000000001".parse::<Amount>(), Err(AmountError::TooPrecise(_))));
        assert_eq!("184467440738".parse::<Amount>(), Err(AmountError::Overflow));
    }

    #[test]
    fn test_repeated_tenths_do_not_drift() {
        let tenth: Amount = "0.1".parse().unwrap();
        let mut total = Amount::ZERO;
        for _ in 0..1_000 {
            total = total.checked_add(tenth).unwrap();
        }
        assert_eq!(total, Amount::from_coins(100).unwrap());
    }

    #[test]
    fn test_json_uses_text_form() {
        let amount: Amount = "12.3456".parse().unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"12.34560000\"");
        assert_eq!(serde_json::from_str::<Amount>(&json).unwrap(), amount);
    }

    #[test]
    fn test_signed_totals_floor_at_zero() {
        assert_eq!(Amount::from_signed_total(-5), Ok(Amount::ZERO));
        assert_eq!(Amount::from_signed_total(7), Ok(Amount::from_base_units(7)));
    }

    #[test]
    fn test_signed_totals_past_max_are_rejected() {
        let max = i128::from(u64::MAX);
        assert_eq!(Amount::from_signed_total(max), Ok(Amount::from_base_units(u64::MAX)));
        assert_eq!(Amount::from_signed_total(max + 1), Err(AmountError::Overflow));
    }

    proptest! {
        #[test]
        fn prop_text_form_parses_back(units in any::<u64>()) {
            let amount = Amount::from_base_units(units);
            prop_assert_eq!(amount.to_string().parse::<Amount>().unwrap(), amount);
        }
    }
}
