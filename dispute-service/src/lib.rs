//! Dispute arbiter: escalation and forced trade outcomes

pub mod service;
pub mod repository;

pub use service::DisputeService;
pub use repository::{DisputeRepository, InMemoryDisputeRepository, PostgresDisputeRepository};
