//! Error handling module for AytchMCP
//!
//! This module provides the crate-level error type used by configuration,
//! registry construction and server startup.

mod error;

// Re-export the main error types and utilities
pub use error::{AytchError, Result};
