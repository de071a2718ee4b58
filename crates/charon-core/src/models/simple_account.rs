//! Simple accounts
//!
//! A stripped-down, single-balance account model served through the
//! accounting store's fast path. It does not interoperate with the full
//! balance model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleAccount {
    pub tenant: String,
    pub name: String,
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default)]
    pub max_balance: Option<Decimal>,
    #[serde(default)]
    pub disabled: bool,
}

impl SimpleAccount {
    pub fn new(tenant: &str, name: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
            balance: Decimal::ZERO,
            max_balance: None,
            disabled: false,
        }
    }

    /// Credit respecting the max-balance cap
    pub fn add(&mut self, amount: Decimal) {
        self.balance += amount;
        if let Some(max) = self.max_balance {
            if self.balance > max {
                self.balance = max;
            }
        }
    }
}
