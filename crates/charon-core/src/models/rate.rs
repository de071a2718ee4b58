//! Rates, destination rates and rate intervals
//!
//! A [`RateSlot`] prices one segment of a call, selected by how deep into
//! the call the charged second falls (`group_interval_start`). A
//! [`DestinationRate`] binds an ordered slot list to rounding and max-cost
//! policy, and a [`RateInterval`] attaches all of that to a timing with a
//! weight.

use super::timing::TimingSpec;
use crate::error::{AppError, AppResult};
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One `(price, unit, increment)` segment of a rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSlot {
    /// Call second this slot takes over from, measured from call start
    pub group_interval_start: Duration,

    /// Price per `rate_unit`
    pub rate: Decimal,

    /// Unit the price refers to
    pub rate_unit: Duration,

    /// Billing granularity; usage is charged in whole increments
    pub rate_increment: Duration,
}

impl RateSlot {
    pub fn new(
        group_interval_start: Duration,
        rate: Decimal,
        rate_unit: Duration,
        rate_increment: Duration,
    ) -> Self {
        Self {
            group_interval_start,
            rate,
            rate_unit,
            rate_increment,
        }
    }

    /// Cost of one increment: `rate × rate_increment / rate_unit`
    pub fn increment_cost(&self) -> AppResult<Decimal> {
        if self.rate_increment.is_zero() || self.rate_unit.is_zero() {
            return Err(AppError::MalformedRate(
                "rate increment and rate unit must be non-zero".to_string(),
            ));
        }
        let increment = Decimal::from_i128_with_scale(self.rate_increment.as_nanos() as i128, 0);
        let unit = Decimal::from_i128_with_scale(self.rate_unit.as_nanos() as i128, 0);
        Ok(self.rate * increment / unit)
    }
}

/// Rounding applied to each timespan cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundingMethod {
    #[serde(rename = "*up")]
    Up,
    #[serde(rename = "*down")]
    Down,
    #[default]
    #[serde(rename = "*middle")]
    Middle,
}

impl RoundingMethod {
    pub fn round(&self, value: Decimal, decimals: u32) -> Decimal {
        match self {
            RoundingMethod::Up => {
                value.round_dp_with_strategy(decimals, RoundingStrategy::AwayFromZero)
            }
            RoundingMethod::Down => {
                value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
            }
            RoundingMethod::Middle => {
                value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
            }
        }
    }
}

/// What happens once the max cost is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaxCostStrategy {
    /// Further increments are free
    #[default]
    #[serde(rename = "*free")]
    Free,
    /// The call is cut at the instant the cap is reached
    #[serde(rename = "*disconnect")]
    Disconnect,
}

/// Binding of a destination group to a rate, with rounding and cap policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRate {
    /// Charged once, on the first increment of the call
    pub connect_fee: Decimal,

    /// Slots sorted ascending by `group_interval_start`
    pub slots: Vec<RateSlot>,

    pub rounding_method: RoundingMethod,
    pub rounding_decimals: u32,

    pub max_cost: Option<Decimal>,
    pub max_cost_strategy: MaxCostStrategy,
}

impl DestinationRate {
    pub fn new(connect_fee: Decimal, slots: Vec<RateSlot>) -> Self {
        let mut slots = slots;
        slots.sort_by_key(|s| s.group_interval_start);
        Self {
            connect_fee,
            slots,
            rounding_method: RoundingMethod::default(),
            rounding_decimals: 4,
            max_cost: None,
            max_cost_strategy: MaxCostStrategy::default(),
        }
    }

    /// Slot covering the given call second: the one with the largest
    /// `group_interval_start <= start`
    pub fn slot_at(&self, start: Duration) -> Option<&RateSlot> {
        self.slots
            .iter()
            .rev()
            .find(|s| s.group_interval_start <= start)
    }

    pub fn round(&self, value: Decimal) -> Decimal {
        self.rounding_method.round(value, self.rounding_decimals)
    }
}

/// A destination rate active under a timing, weighted for overlaps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateInterval {
    pub timing: TimingSpec,
    pub rating: DestinationRate,
    pub weight: f64,
}

impl RateInterval {
    /// Whether the interval covers the instant; end instants are checked
    /// one tick back so a span ending exactly on the margin still belongs
    pub fn contains(&self, t: chrono::DateTime<chrono::Utc>, end_time: bool) -> bool {
        let t = if end_time {
            t - chrono::Duration::nanoseconds(1)
        } else {
            t
        };
        self.timing.matches(t)
    }
}
