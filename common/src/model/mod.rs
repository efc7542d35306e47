//! Domain models for the escrow engine

pub mod actor;
pub mod balance;
pub mod offer;
pub mod trade;
pub mod holding;
pub mod transfer;
pub mod dispute;
pub mod settings;

/// The single asset tracked by the internal ledger. Offers and trades in any
/// other asset are matched and settled entirely off-ledger.
pub const LEDGER_ASSET: &str = "FDA";
