//! Ledger service: balances, escrow reservations, holdings, and settings

pub mod service;
pub mod repository;
pub mod config;

pub use service::LedgerService;
pub use service::RepositoryType;
pub use repository::{LedgerRepository, InMemoryLedgerRepository, PostgresLedgerRepository};
pub use config::LedgerServiceConfig;
