//! HTTP handlers

pub mod cart;
pub mod finance;
pub mod health;
pub mod inventory;
pub mod orders;

pub use health::health_check;
