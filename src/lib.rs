//! GridGate - gRPC proxy for a partitioned cache fabric.
//!
//! GridGate is a single-binary proxy that exposes named caches from a
//! partitioned cache fabric over gRPC. Clients speak a protobuf cache
//! protocol (unary entry operations, server-streamed bulk queries, and a
//! bidirectional event stream); GridGate translates every call onto the
//! fabric's `NamedCache` seam, converting payloads between the client's
//! wire format and the fabric's native format along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         gRPC Clients                            │
//! │     unary ops    │    streamed queries    │    event streams    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Transport Layer                          │
//! │           (gRPC framing, routing, message size limits)          │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Proxy Services                           │
//! │   NamedCacheService │ PagedScanner │ MapListenerProxy │ Pool    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Cache Fabric                             │
//! │        Scopes │ NamedCache │ Partitions │ Map Listeners         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy and gRPC status mapping
//! - [`core::pool`] - Worker pool for cache operations
//!
//! ## Fabric
//! - [`fabric`] - Cache fabric seam: `NamedCache`, listeners, scopes
//! - [`fabric::partition`] - Partition set bitmap
//! - [`fabric::memory`] - In-memory reference backend
//!
//! ## Serialization
//! - [`serializer`] - Named wire formats and payload conversion
//!
//! ## Proxy
//! - [`proxy::proto`] - Protobuf message definitions
//! - [`proxy::service`] - Cache operation dispatch
//! - [`proxy::paged`] - Cookie-driven paged key/entry scans
//! - [`proxy::listener`] - Map listener proxy and event stream state
//!
//! ## Transport
//! - [`transport::grpc`] - gRPC server, framing, and routing
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - **Page completeness**: a paged scan visits every partition exactly
//!   once per cookie chain; an empty cookie starts a scan, a zero-length
//!   cookie ends it
//! - **Cookie topology**: a cookie minted against one partition count is
//!   rejected by any cache with a different one
//! - **Listener upgrade**: a lite key registration upgraded to heavy is
//!   re-registered with the fabric exactly once
//! - **In-band errors**: protocol violations on an event stream are
//!   reported as error messages without tearing the stream down

// Core infrastructure
pub mod core;

// Cache fabric seam and reference backend
pub mod fabric;

// Wire format registry
pub mod serializer;

// Proxy services
pub mod proxy;

// gRPC transport
pub mod transport;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, pool};
pub use proxy::{listener, paged, proto, service};
pub use transport::grpc;
