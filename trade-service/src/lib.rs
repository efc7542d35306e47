//! Trade engine: offer acceptance, payment marking, release, cancellation

pub mod service;
pub mod repository;

pub use service::TradeService;
pub use repository::{TradeRepository, InMemoryTradeRepository, PostgresTradeRepository};
