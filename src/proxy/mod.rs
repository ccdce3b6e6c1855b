//! The cache proxy.
//!
//! This module contains the gRPC-facing proxy machinery:
//! - [`proto`] - Wire message types for the gridgate.v1 protocol
//! - [`service`] - Operation layer between transport and fabric
//! - [`paged`] - Cookie-driven paged partition scanner
//! - [`listener`] - Listener registration proxy for the events stream

pub mod listener;
pub mod paged;
pub mod proto;
pub mod service;
