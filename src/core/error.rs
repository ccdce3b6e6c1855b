//! Error types and wire mapping.
//!
//! GridGate defines one error taxonomy for everything between the wire
//! surface and the fabric seam. Unary and server-streaming operations
//! surface these as a terminal `tonic::Status`; the bidirectional event
//! stream reports protocol violations in-band (the stream stays open)
//! and reserves stream termination for transport and fabric failures.

use thiserror::Error;

/// Common GridGate error conditions.
#[derive(Debug, Error)]
pub enum GateError {
    /// Malformed or missing request input: cache name, payload, format,
    /// filter identifier, and similar.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A paged-query cookie that could not be decoded or that does not
    /// match the topology of the cache it was submitted against.
    #[error("invalid page cookie: {message}")]
    InvalidCookie { message: String },

    /// The cache's service cannot satisfy a structural requirement,
    /// e.g. partition ownership on a non-partitioned service.
    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// Protocol-sequence violation on the event stream: unsubscribing an
    /// untracked key, switching cache mid-stream.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// Named resource (scope, serializer format) is not known.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Payload could not be decoded or re-encoded in the requested format.
    #[error("serialization failed: {message}")]
    Serialization { message: String },

    /// Failure reported by the cache fabric.
    #[error("fabric error: {message}")]
    Fabric { message: String },

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GateError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an InvalidCookie error.
    pub fn invalid_cookie(message: impl Into<String>) -> Self {
        Self::InvalidCookie {
            message: message.into(),
        }
    }

    /// Create a PreconditionFailed error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Create an IllegalState error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a Fabric error.
    pub fn fabric(message: impl Into<String>) -> Self {
        Self::Fabric {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The numeric gRPC status code for this error.
    ///
    /// Used for the in-band error message on the event stream, which
    /// carries the code without terminating the RPC.
    pub fn grpc_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidCookie { .. } => 3,
            Self::NotFound { .. } => 5,
            Self::PreconditionFailed { .. } | Self::IllegalState { .. } => 9,
            Self::Serialization { .. } => 3,
            Self::Fabric { .. } | Self::Internal { .. } => 13,
        }
    }

    /// Whether this error is a stream-level protocol violation rather
    /// than a transport/fabric failure.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidCookie { .. }
                | Self::IllegalState { .. }
                | Self::NotFound { .. }
                | Self::Serialization { .. }
        )
    }
}

/// Result type using GateError.
pub type GateResult<T> = Result<T, GateError>;

/// Map a GateError to a terminal `tonic::Status`.
pub fn to_status(error: GateError) -> tonic::Status {
    match &error {
        GateError::InvalidArgument { message } => tonic::Status::invalid_argument(message.clone()),
        GateError::InvalidCookie { .. } => tonic::Status::invalid_argument(error.to_string()),
        GateError::PreconditionFailed { .. } => {
            tonic::Status::failed_precondition(error.to_string())
        }
        GateError::IllegalState { .. } => tonic::Status::failed_precondition(error.to_string()),
        GateError::NotFound { message } => tonic::Status::not_found(message.clone()),
        GateError::Serialization { .. } => tonic::Status::invalid_argument(error.to_string()),
        GateError::Fabric { message } => tonic::Status::internal(message.clone()),
        GateError::Internal { message } => tonic::Status::internal(message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_codes() {
        assert_eq!(GateError::invalid_argument("x").grpc_code(), 3);
        assert_eq!(GateError::invalid_cookie("x").grpc_code(), 3);
        assert_eq!(GateError::illegal_state("x").grpc_code(), 9);
        assert_eq!(GateError::precondition("x").grpc_code(), 9);
        assert_eq!(GateError::internal("x").grpc_code(), 13);
        assert_eq!(GateError::not_found("x").grpc_code(), 5);
    }

    #[test]
    fn protocol_violation_split() {
        assert!(GateError::invalid_argument("bad filter id").is_protocol_violation());
        assert!(GateError::illegal_state("unregistered key").is_protocol_violation());
        assert!(!GateError::fabric("listener registration failed").is_protocol_violation());
        assert!(!GateError::internal("boom").is_protocol_violation());
    }

    #[test]
    fn status_mapping() {
        let status = to_status(GateError::invalid_cookie("truncated"));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("truncated"));

        let status = to_status(GateError::precondition("not partitioned"));
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    }
}
