//! Balance engine and action executor
//!
//! Consumes typed balances atomically under the per-account guardian,
//! expands shared groups, fires action triggers and executes the named
//! action handlers.

pub mod balances;
pub mod context;
pub mod debiter;
pub mod executor;
pub mod guardian;
pub mod shared_group;
pub mod triggers;

pub use context::Context;
pub use debiter::Debiter;
pub use executor::ActionExecutor;
pub use guardian::Guardian;
