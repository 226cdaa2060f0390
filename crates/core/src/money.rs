//! Minor-unit money arithmetic.
//!
//! Every amount in the engine is an `i64` count of minor currency units
//! (cents for USD). Intermediate products are computed in `i128` so that
//! `price * weight` never overflows before the division.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// ISO-4217 style currency code (three ASCII upper-case letters).
///
/// The engine treats currencies as opaque: no translation happens, codes are
/// only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency must be a 3-letter upper-case code, got '{code}'"
            )));
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for Currency {}

/// An amount in minor units of a currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        if self.currency != other.currency {
            return Err(DomainError::invariant(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::invariant("money overflow"))?;
        Ok(Money::new(amount, self.currency.clone()))
    }
}

impl ValueObject for Money {}

/// Divide with round-half-away-from-zero.
///
/// Returns `None` on a zero denominator; callers decide what a degenerate
/// split means for them.
pub fn round_half_away(numerator: i128, denominator: i128) -> Option<i128> {
    if denominator == 0 {
        return None;
    }
    let (n, d) = if denominator < 0 {
        (-numerator, -denominator)
    } else {
        (numerator, denominator)
    };
    let q = n / d;
    let r = n % d;
    if 2 * r.abs() >= d {
        Some(q + n.signum())
    } else {
        Some(q)
    }
}

/// Split `amount` proportionally to `weights`.
///
/// Every share except the last is rounded independently; the last share gets
/// the exact remainder so the parts always sum to `amount`. Returns `None`
/// when there are no weights, the weights sum to zero, or a share overflows.
pub fn split_by_weights(amount: i64, weights: &[i128]) -> Option<Vec<i64>> {
    let total: i128 = weights.iter().sum();
    if weights.is_empty() || total == 0 {
        return None;
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned: i128 = 0;
    for w in &weights[..weights.len() - 1] {
        let share = round_half_away(amount as i128 * w, total)?;
        assigned += share;
        shares.push(i64::try_from(share).ok()?);
    }
    shares.push(i64::try_from(amount as i128 - assigned).ok()?);
    Some(shares)
}
