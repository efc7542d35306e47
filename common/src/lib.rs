//! Common types and utilities for the escrow engine
//!
//! This library contains shared types, utilities, and abstractions used across
//! all service crates in the escrow platform. It provides a unified approach to
//! error handling, database access, and domain models.

pub mod error;
pub mod model;
pub mod decimal;
pub mod db;

/// Re-export important types
pub use error::{Error, Result, ErrorExt};
pub use decimal::*;
