//! Business logic services for the Multi-Shop Commerce Platform

pub mod audit;
pub mod cart;
pub mod finance;
pub mod inventory;
pub mod order;
pub mod outbox;
pub mod stock_ledger;
pub mod transfer;

pub use audit::{AuditEntry, AuditLogger};
pub use cart::CartService;
pub use finance::FinanceService;
pub use inventory::InventoryService;
pub use order::OrderService;
pub use outbox::OutboxDispatcher;
pub use transfer::TransferService;
