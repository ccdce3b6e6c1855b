//! Network transport.
//!
//! The gRPC server surface lives here:
//! - [`grpc`] - Hand-rolled tonic service for the gridgate.v1 protocol

pub mod grpc;
