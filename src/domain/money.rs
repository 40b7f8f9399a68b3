use crate::error::MarketplaceError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

const MINOR_UNITS_PER_MAJOR: Decimal = Decimal::ONE_HUNDRED;

/// A positive monetary amount in major currency units.
///
/// This is what the ledger stores. The gateway only ever sees [`MinorUnits`],
/// and the conversion between the two lives here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

/// An amount in the smallest currency unit, as exchanged with the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinorUnits(pub i64);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, MarketplaceError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(MarketplaceError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Scales to minor units. Fractions below one minor unit are rejected
    /// rather than rounded, so the ledger and the gateway never disagree.
    pub fn to_minor_units(&self) -> Result<MinorUnits, MarketplaceError> {
        let scaled = self.0 * MINOR_UNITS_PER_MAJOR;
        if !scaled.fract().is_zero() {
            return Err(MarketplaceError::ValidationError(format!(
                "Amount {} has more precision than the currency allows",
                self.0
            )));
        }
        scaled.to_i64().map(MinorUnits).ok_or_else(|| {
            MarketplaceError::ValidationError(format!("Amount {} is out of range", self.0))
        })
    }

    pub fn checked_add(self, rhs: Amount) -> Result<Amount, MarketplaceError> {
        self.0.checked_add(rhs.0).map(Self).ok_or_else(|| {
            MarketplaceError::ValidationError(format!("Amount {} + {} overflows", self.0, rhs.0))
        })
    }
}

impl MinorUnits {
    pub fn to_amount(self) -> Result<Amount, MarketplaceError> {
        Amount::new(Decimal::from(self.0) / MINOR_UNITS_PER_MAJOR)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = MarketplaceError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
