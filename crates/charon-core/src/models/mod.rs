//! Data model shared by all Charon subsystems
//!
//! Tariff-plan entities (timings, destinations, rates, plans, profiles,
//! actions, triggers, shared groups) are loader-owned and never mutated at
//! runtime; accounts and their balances are mutated only inside the
//! per-account critical section.

pub mod account;
pub mod action;
pub mod balance;
pub mod call;
pub mod cdr;
pub mod destination;
pub mod rate;
pub mod rating_plan;
pub mod rating_profile;
pub mod shared_group;
pub mod simple_account;
pub mod timing;
pub mod trigger;

pub use account::{Account, AccountSummary};
pub use action::{Action, ActionGroup, ActionPlan, ActionPlanBinding, ActionTiming, Task};
pub use balance::{Balance, BalanceFilter, BalanceSummary, BalanceType};
pub use call::{CallCost, CallDescriptor, DebitInfo, Increment, PaymentInfo, TimeSpan};
pub use cdr::{Cdr, CdrFilter, SmCost};
pub use destination::Destination;
pub use rate::{DestinationRate, MaxCostStrategy, RateInterval, RateSlot, RoundingMethod};
pub use rating_plan::RatingPlan;
pub use rating_profile::{RatingPlanActivation, RatingProfile};
pub use shared_group::{SharedGroup, SharingStrategy};
pub use simple_account::SimpleAccount;
pub use timing::TimingSpec;
pub use trigger::{ActionTrigger, ActionTriggerGroup, ActionTriggerRecord, ThresholdType};

/// Wildcard matching any value in filters and destination sets
pub const ANY: &str = "*any";

/// Identifier of the lazily created default monetary balance
pub const DEFAULT_BALANCE: &str = "*default";

/// Rating-subject prefix marking zero-rated unit balances (e.g. `*zero1s`)
pub const ZERO_RATING_SUBJECT_PREFIX: &str = "*zero";

/// Joins key components the way profiles and lock names are addressed
pub fn concat_key(parts: &[&str]) -> String {
    parts.join(":")
}
