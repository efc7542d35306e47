//! Offer book: open buy/sell offers and the SELL-offer escrow rule

pub mod service;
pub mod repository;

pub use service::OfferService;
pub use repository::{OfferRepository, InMemoryOfferRepository, PostgresOfferRepository};
