//! Amount type for monetary values typed by people in a chat.
//!
//! This module provides the `Amount` type which wraps `Decimal` and handles parsing values that
//! may include a currency marker (`R$`, `$`, `reais`), thousands separators, and either a comma or
//! a dot as the decimal separator.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Currency markers that are removed before the numeric value is parsed. Longer markers come
/// first so that `r$` is removed before `$` and `reais` before `real`.
const CURRENCY_MARKERS: &[&str] = &["r$", "brl", "reais", "real", "$"];

/// The number of fractional digits every `Amount` carries.
const SCALE: u32 = 2;

/// Represents a positive monetary amount with exactly two fractional digits.
///
/// # Examples
///
/// Brazilian and US formatting yield the same value:
/// ```
/// # use chat_ledger::model::Amount;
/// # use std::str::FromStr;
/// let a = Amount::from_str("R$ 1.250,50").unwrap();
/// let b = Amount::from_str("1,250.50").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "1250.50");
/// ```
///
/// Zero and negative values are rejected:
/// ```
/// # use chat_ledger::model::Amount;
/// # use std::str::FromStr;
/// assert!(Amount::from_str("0,00").is_err());
/// assert!(Amount::from_str("-35,90").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    /// Creates an `Amount` from a `Decimal`, rounding half away from zero to two places.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        let mut value = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive);
        }
        value.rescale(SCALE);
        Ok(Self { value })
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Formats the amount the way Brazilian users write it, e.g. `R$ 1.234,56`.
    pub fn brl(&self) -> String {
        format_brl(self.value)
    }
}

/// Formats any decimal, including negative balances, as `R$ 1.234,56`.
pub fn format_brl(value: Decimal) -> String {
    let us = format_num::format_num!(",.2", value.to_f64().unwrap_or_default());
    let swapped: String = us
        .chars()
        .map(|c| match c {
            ',' => '.',
            '.' => ',',
            other => other,
        })
        .collect();
    format!("R$ {swapped}")
}

/// An error that can occur when parsing strings into `Amount` values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("no amount was given")]
    Empty,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("the amount must be greater than zero")]
    NotPositive,
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let original = s.trim();
        let mut text = original.to_lowercase();
        for marker in CURRENCY_MARKERS {
            text = text.replace(marker, "");
        }
        let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if text.is_empty() {
            return Err(AmountError::Empty);
        }

        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(&text)),
        };

        let canonical =
            canonicalize(unsigned).ok_or_else(|| AmountError::NotANumber(original.to_string()))?;
        let value = Decimal::from_str(&canonical)
            .map_err(|_| AmountError::NotANumber(original.to_string()))?;
        if negative {
            return Err(AmountError::NotPositive);
        }
        Amount::new(value)
    }
}

/// Rewrites a number that uses `,` and/or `.` separators into the `1234.56` form, or returns
/// `None` when the separators cannot be interpreted unambiguously.
fn canonicalize(text: &str) -> Option<String> {
    if text.is_empty()
        || !text
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        return None;
    }

    let (int_part, frac_part) = match decimal_separator(text) {
        Some(ix) => (&text[..ix], &text[ix + 1..]),
        None => (text, ""),
    };

    if frac_part.len() > SCALE as usize || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let int_digits = strip_grouping(int_part)?;
    if frac_part.is_empty() {
        Some(int_digits)
    } else {
        Some(format!("{int_digits}.{frac_part}"))
    }
}

/// Finds the byte index of the decimal separator, if there is one.
///
/// - When both `,` and `.` appear, the rightmost one is the decimal separator.
/// - A lone `,` is always the decimal separator, so `1,500` has too many fractional digits.
/// - A lone `.` followed by one or two digits is the decimal separator.
/// - Otherwise separators are thousands separators (e.g. `1.500` is fifteen hundred).
fn decimal_separator(text: &str) -> Option<usize> {
    match (text.rfind(','), text.rfind('.')) {
        (Some(comma), Some(dot)) => Some(comma.max(dot)),
        (Some(ix), None) if text.matches(',').count() == 1 => Some(ix),
        (Some(_), None) => None,
        (None, Some(ix)) => {
            let frac_len = text.len() - ix - 1;
            (text.matches('.').count() == 1 && (1..=2).contains(&frac_len)).then_some(ix)
        }
        (None, None) => None,
    }
}

/// Removes thousands separators from the integer part. Groups after the first must have exactly
/// three digits and all separators must be the same character.
fn strip_grouping(int_part: &str) -> Option<String> {
    if int_part.is_empty() {
        return Some(String::from("0"));
    }
    let has_comma = int_part.contains(',');
    let has_dot = int_part.contains('.');
    if has_comma && has_dot {
        return None;
    }
    if !has_comma && !has_dot {
        return Some(int_part.to_string());
    }

    let sep = if has_comma { ',' } else { '.' };
    let mut groups = int_part.split(sep);
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn parse(s: &str) -> Decimal {
        Amount::from_str(s).unwrap().value()
    }

    #[test]
    fn test_comma_and_dot_decimal_are_equivalent() {
        assert_eq!(parse("35,90"), dec("35.90"));
        assert_eq!(parse("35.90"), dec("35.90"));
        assert_eq!(Amount::from_str("35,9"), Amount::from_str("35.90"));
    }

    #[test]
    fn test_integer_gets_two_fractional_digits() {
        let amount = Amount::from_str("150").unwrap();
        assert_eq!(amount.to_string(), "150.00");
        assert_eq!(amount.value().scale(), 2);
    }

    #[test]
    fn test_currency_markers_are_stripped() {
        assert_eq!(parse("R$ 750,00"), dec("750.00"));
        assert_eq!(parse("r$750"), dec("750"));
        assert_eq!(parse("$ 12.50"), dec("12.50"));
        assert_eq!(parse("49,90 reais"), dec("49.90"));
        assert_eq!(parse("BRL 10"), dec("10"));
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(parse("R$ 750.000,00"), dec("750000.00"));
        assert_eq!(parse("1.250,50"), dec("1250.50"));
        assert_eq!(parse("1,250.50"), dec("1250.50"));
        assert_eq!(parse("1.500"), dec("1500"));
        assert_eq!(parse("1,234,567"), dec("1234567"));
        assert!(Amount::from_str("1,500").is_err());
        assert!(Amount::from_str("35,900").is_err());
        assert_eq!(parse("1.234.567"), dec("1234567"));
        assert_eq!(parse("R$ 2.750,85"), dec("2750.85"));
    }

    #[test]
    fn test_leading_decimal_separator() {
        assert_eq!(parse(",50"), dec("0.50"));
    }

    #[test]
    fn test_rejects_zero_and_negative() {
        assert_eq!(Amount::from_str("0"), Err(AmountError::NotPositive));
        assert_eq!(Amount::from_str("0,00"), Err(AmountError::NotPositive));
        assert_eq!(Amount::from_str("-35,90"), Err(AmountError::NotPositive));
        assert_eq!(Amount::from_str("R$ -10"), Err(AmountError::NotPositive));
        assert!(Amount::new(dec("0.004")).is_err());
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert_eq!(Amount::from_str(""), Err(AmountError::Empty));
        assert_eq!(Amount::from_str("  R$ "), Err(AmountError::Empty));
        assert!(matches!(
            Amount::from_str("abc"),
            Err(AmountError::NotANumber(_))
        ));
        assert!(Amount::from_str("12a").is_err());
        assert!(Amount::from_str("1.2345").is_err());
        assert!(Amount::from_str("1.2,3.4").is_err());
        assert!(Amount::from_str("35,").is_err());
        assert!(Amount::from_str("1,250,5").is_err());
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        let amount = Amount::new(dec("10.005")).unwrap();
        assert_eq!(amount.value(), dec("10.01"));
    }

    #[test]
    fn test_brl_format() {
        let amount = Amount::from_str("1234,56").unwrap();
        assert_eq!(amount.brl(), "R$ 1.234,56");
        assert_eq!(format_brl(dec("35.9")), "R$ 35,90");
    }

    #[test]
    fn test_serde_as_string() {
        let amount = Amount::from_str("35,90").unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"35.90\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }
}
