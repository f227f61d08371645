//! Asset lot and credit classification types
//!
//! An asset lot is a quantity of a specific credit type/vintage/standard
//! owned by exactly one account. Lot amounts change only as a side effect of
//! a terminal ledger intent.

use crate::errors::LotError;
use crate::ids::{AccountId, LedgerTxRef, LotId};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Certification standard a credit was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditStandard {
    Verra,
    GoldStandard,
    AmericanCarbonRegistry,
    ClimateActionReserve,
}

/// Project category a credit originates from (e.g. "forestry", "solar").
///
/// Kept open-ended as a string newtype; the registry does not maintain a
/// closed taxonomy of project types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditType(String);

impl CreditType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CreditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CreditType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A quantity of credits of one type/vintage/standard owned by one account.
///
/// Invariants:
/// - `amount` is never negative
/// - `amount` decreases only via confirmed transfer/retire/trade-sell intents
/// - `amount` increases only via confirmed mint/transfer-in/trade-buy intents
/// - ownership changes only as a side effect of a terminal intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLot {
    pub lot_id: LotId,
    pub owner: AccountId,
    pub credit_type: CreditType,
    /// Issuance year of the underlying credits.
    pub vintage: u16,
    pub standard: CreditStandard,
    pub amount: Quantity,
    pub original_price: Price,
    pub current_price: Price,
    /// Token reference on the external ledger backing this lot.
    pub ledger_token_ref: LedgerTxRef,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AssetLot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: AccountId,
        credit_type: CreditType,
        vintage: u16,
        standard: CreditStandard,
        amount: Quantity,
        price: Price,
        ledger_token_ref: LedgerTxRef,
        timestamp: i64,
    ) -> Self {
        Self {
            lot_id: LotId::new(),
            owner,
            credit_type,
            vintage,
            standard,
            amount,
            original_price: price,
            current_price: price,
            ledger_token_ref,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Remove credits from the lot. Fails rather than going negative.
    pub fn debit(&mut self, quantity: Quantity, timestamp: i64) -> Result<(), LotError> {
        let remaining =
            self.amount
                .checked_sub(quantity)
                .ok_or_else(|| LotError::InsufficientAmount {
                    lot_id: self.lot_id,
                    requested: quantity.to_string(),
                    available: self.amount.to_string(),
                })?;
        self.amount = remaining;
        self.updated_at = timestamp;
        Ok(())
    }

    /// Add credits to the lot.
    pub fn credit(&mut self, quantity: Quantity, timestamp: i64) {
        self.amount = self.amount + quantity;
        self.updated_at = timestamp;
    }

    /// Whether credits of the given classification can be merged into this lot.
    ///
    /// Merging requires the same owner, credit type, vintage, and standard.
    pub fn accepts(
        &self,
        owner: &AccountId,
        credit_type: &CreditType,
        vintage: u16,
        standard: CreditStandard,
    ) -> bool {
        self.owner == *owner
            && self.credit_type == *credit_type
            && self.vintage == vintage
            && self.standard == standard
    }
}
