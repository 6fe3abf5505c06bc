//! Error types for tidelog.
//!
//! This module provides a unified error type [`TidelogError`] for all log,
//! placement and replication operations, along with a convenient [`Result`]
//! type alias.
//!
//! # Error Categories
//!
//! - **Configuration**: invalid settings, fatal at startup
//! - **Argument**: rejected synchronously, no partial state is created
//! - **Coordination**: the request must be retried against another node
//! - **Network**: transient, retried a bounded number of times
//! - **Storage**: segment files and memory maps
//!
//! # Example
//!
//! ```rust
//! use tidelog::error::{Result, TidelogError};
//!
//! fn check_factor(requested: usize, cluster_size: usize) -> Result<()> {
//!     if requested > cluster_size {
//!         return Err(TidelogError::InvalidArgument(format!(
//!             "replication factor {} exceeds cluster size {}",
//!             requested, cluster_size
//!         )));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_factor(3, 2).is_err());
//! ```

use crate::types::{NodeKey, RouteKey};
use std::io;
use thiserror::Error;

/// Main error type for tidelog operations.
#[derive(Error, Debug)]
pub enum TidelogError {
    // Argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient nodes: requested {requested}, available {available}")]
    InsufficientNodes { requested: usize, available: usize },

    #[error("Record too large: {size} bytes, segment holds at most {max}")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Offset {requested} is beyond the end of the log ({end})")]
    OffsetOutOfRange { requested: u64, end: u64 },

    // Coordination errors
    #[error("Not the coordinator. Coordinator is: {coordinator:?}")]
    NotCoordinator { coordinator: Option<NodeKey> },

    #[error("Route {route_key} is not served locally. Leader is: {leader:?}")]
    NotLocal {
        route_key: RouteKey,
        leader: Option<NodeKey>,
    },

    #[error("Route not found: {0}")]
    RouteNotFound(RouteKey),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("Write failed for route {route_key}: {reason}")]
    WriteFailed { route_key: RouteKey, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Data corruption: {0}")]
    DataCorruption(String),

    #[error("Log is closed")]
    Closed,

    // Network errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error {code}: {message}")]
    Remote { code: u16, message: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TidelogError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TidelogError::ConnectionFailed(_)
            | TidelogError::Timeout(_)
            | TidelogError::Network(_) => true,
            TidelogError::Remote { code, .. } => *code >= 500,
            _ => false,
        }
    }

    /// Status code reported on the replication wire.
    pub fn response_code(&self) -> u16 {
        match self {
            TidelogError::InvalidArgument(_)
            | TidelogError::RecordTooLarge { .. }
            | TidelogError::OffsetOutOfRange { .. }
            | TidelogError::Deserialization(_) => 400,
            TidelogError::NotLocal { .. }
            | TidelogError::RouteNotFound(_)
            | TidelogError::NodeNotFound(_) => 404,
            TidelogError::Remote { code, .. } => *code,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for TidelogError {
    fn from(e: serde_json::Error) -> Self {
        TidelogError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for TidelogError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TidelogError::Timeout(0)
        } else if e.is_connect() {
            TidelogError::ConnectionFailed(e.to_string())
        } else if e.is_decode() {
            TidelogError::Deserialization(e.to_string())
        } else {
            TidelogError::Network(e.to_string())
        }
    }
}

/// Result type alias for tidelog operations.
pub type Result<T> = std::result::Result<T, TidelogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TidelogError::Timeout(100).is_retryable());
        assert!(TidelogError::ConnectionFailed("refused".into()).is_retryable());
        assert!(TidelogError::Remote {
            code: 503,
            message: "busy".into()
        }
        .is_retryable());

        assert!(!TidelogError::Remote {
            code: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!TidelogError::InvalidArgument("rf".into()).is_retryable());
        assert!(!TidelogError::NotCoordinator { coordinator: None }.is_retryable());
    }

    #[test]
    fn test_response_codes() {
        assert_eq!(
            TidelogError::NotLocal {
                route_key: 7,
                leader: None
            }
            .response_code(),
            404
        );
        assert_eq!(TidelogError::InvalidArgument("x".into()).response_code(), 400);
        assert_eq!(
            TidelogError::NotCoordinator { coordinator: Some(1) }.response_code(),
            500
        );
    }
}
