//! Expense receipt model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{EntityKind, EntityPayload};
use crate::error::{Error, Result};

fn default_currency() -> String {
    "USD".to_string()
}

/// An expense receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Purchase date
    pub date: NaiveDate,
    /// Merchant name
    pub vendor: String,
    /// Expense category (fuel, meals, lodging, ...)
    pub category: String,
    /// Amount in minor units
    pub amount_cents: i64,
    /// ISO 4217 currency code
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Reference to the attached receipt image
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl Receipt {
    pub fn new(
        date: NaiveDate,
        vendor: impl Into<String>,
        category: impl Into<String>,
        amount_cents: i64,
    ) -> Self {
        Self {
            date,
            vendor: vendor.into(),
            category: category.into(),
            amount_cents,
            currency: default_currency(),
            notes: None,
            image_ref: None,
        }
    }
}

impl EntityPayload for Receipt {
    const KIND: EntityKind = EntityKind::Receipt;

    fn record_date(&self) -> NaiveDate {
        self.date
    }

    fn validate(&self) -> Result<()> {
        if self.vendor.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Receipt vendor cannot be empty".to_string(),
            ));
        }
        if self.amount_cents < 0 {
            return Err(Error::InvalidInput(
                "Receipt amount cannot be negative".to_string(),
            ));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::InvalidInput(format!(
                "Invalid currency code: {}",
                self.currency
            )));
        }
        Ok(())
    }
}
