//! Core infrastructure.
//!
//! This module contains the essential components for running GridGate:
//! - [`config`] - Configuration parsing and validation
//! - [`error`] - Error types and wire mapping
//! - [`pool`] - Worker pool for cache operations

pub mod config;
pub mod error;
pub mod pool;
