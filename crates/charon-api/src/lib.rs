//! RPC surface
//!
//! A request/reply envelope carrying a method name and a JSON parameter
//! object, dispatched to the responder. Every reply carries either a
//! result or an error with a stable machine-readable kind.

pub mod dto;
pub mod handlers;
pub mod responder;
pub mod routes;

pub use responder::Responder;
