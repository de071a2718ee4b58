//! Core types, traits, and error handling for the Charon charging platform.
//!
//! Everything the rating engine, balance engine and scheduler share lives
//! here: the tariff-plan and account data model, the unified error type,
//! configuration, the compiled predicate filters and the storage traits.

pub mod config;
pub mod error;
pub mod expr;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
