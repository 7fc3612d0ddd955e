//! Shared types and models for the Multi-Shop Commerce Platform
//!
//! This crate contains the I/O-free domain rules shared between the backend,
//! the back-office client (via WASM), and tests: the order state machine,
//! role gating, cart splitting, and ledger sign conventions.

pub mod models;
pub mod policy;
pub mod types;
pub mod validation;

pub use models::*;
pub use policy::*;
pub use types::*;
pub use validation::*;
