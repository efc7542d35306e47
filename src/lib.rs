// This is a metapackage for tests
// Re-export the service crates so integration tests and downstream
// consumers can reach the whole engine through one dependency

pub use common;
pub use dispute_service;
pub use ledger_service;
pub use offer_service;
pub use trade_service;
