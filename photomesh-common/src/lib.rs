//! # PhotoMesh Common Library
//!
//! Shared code for the PhotoMesh services:
//! - Error type and result alias
//! - TOML configuration loading and path resolution
//! - Pipeline event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
