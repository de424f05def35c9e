//! Core types for the RPC dispatch core.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed client identifiers for reply routing
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Transport configuration

mod config;
mod errors;
mod ids;

pub use config::RpcConfig;
pub use errors::{Error, Result};
pub use ids::ClientId;
