//! Domain models for the Multi-Shop Commerce Platform

mod audit;
mod finance;
mod inventory;
mod order;
mod product;

pub use audit::*;
pub use finance::*;
pub use inventory::*;
pub use order::*;
pub use product::*;
