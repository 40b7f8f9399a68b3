use super::money::Amount;
use crate::error::{MarketplaceError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fee schedule read from the ledger at the start of each operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub booking_fee: Amount,
    /// Surcharge added to the next booking of a customer carrying a fine.
    pub fine_amount: Amount,
    pub onboarding_fee: Amount,
}

impl FeeConfig {
    /// Upfront fee for a new booking, and whether a fine was folded into it.
    pub fn initial_amount(&self, customer: &Customer) -> Result<(Amount, bool)> {
        if customer.fine_imposed {
            Ok((self.booking_fee.checked_add(self.fine_amount)?, true))
        } else {
            Ok((self.booking_fee, false))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub id: Uuid,
    pub name: String,
    pub min_pay_rate: Amount,
    pub max_pay_rate: Amount,
}

impl ServiceCategory {
    /// Pay rates outside the category band are rejected.
    pub fn validate_pay_rate(&self, pay_rate: Amount) -> Result<()> {
        if pay_rate < self.min_pay_rate || pay_rate > self.max_pay_rate {
            return Err(MarketplaceError::ValidationError(format!(
                "Pay rate {} is outside the {} band [{}, {}]",
                pay_rate, self.name, self.min_pay_rate, self.max_pay_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub fine_imposed: bool,
}

impl Customer {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            fine_imposed: false,
        }
    }
}
