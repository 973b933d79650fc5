//! # ShelfScan Common Library
//!
//! Shared code for the ShelfScan services:
//! - Error types and transient-error classification
//! - Configuration loading (CLI → ENV → TOML → OS default)
//! - Logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
