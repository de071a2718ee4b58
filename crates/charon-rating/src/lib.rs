//! Rating engine
//!
//! Walks the time-banded hierarchy of rating profiles, rating plans,
//! destination rates and rate slots to produce a timeline of per-increment
//! monetary costs for a call window.

pub mod cache;
pub mod calculator;
pub mod destinations;
pub mod resolver;

pub use cache::TariffCache;
pub use calculator::Calculator;
pub use destinations::{DestinationIndex, DestinationMatch};
pub use resolver::{RatingInfo, Resolver};
