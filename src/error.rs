//! Unified error handling for slircd-link.
//!
//! Link failures are classified so the session layer can decide between
//! rejecting a handshake, force-closing an established link, and dropping a
//! single command. Every variant carries a static code for metric labels.

use slirc_proto::{ProtocolError, ServerId};
use thiserror::Error;

// ============================================================================
// Link Errors (per-session failures)
// ============================================================================

/// Errors that end a server link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("incompatible protocol: {0}")]
    IncompatibleProtocol(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("server already exists: {0}")]
    DuplicateServer(String),

    #[error("introduction would create a cycle: {0}")]
    WouldCreateCycle(String),

    #[error("end of burst not received in time")]
    BurstTimeout,

    #[error("handshake not completed in time")]
    HandshakeTimeout,

    #[error("ping timeout")]
    PingTimeout,

    #[error("send queue exceeded {0} lines")]
    SendQueueOverflow(usize),

    #[error("link closed: {0}")]
    Closed(String),
}

impl LinkError {
    /// Get a static error code string for metrics labeling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::IncompatibleProtocol(_) => "incompatible_protocol",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::DuplicateServer(_) => "duplicate_server",
            Self::WouldCreateCycle(_) => "would_create_cycle",
            Self::BurstTimeout => "burst_timeout",
            Self::HandshakeTimeout => "handshake_timeout",
            Self::PingTimeout => "ping_timeout",
            Self::SendQueueOverflow(_) => "sendq_overflow",
            Self::Closed(_) => "closed",
        }
    }

    /// Whether the link is refused before the peer enters the topology.
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleProtocol(_)
                | Self::AuthenticationFailed(_)
                | Self::DuplicateServer(_)
                | Self::WouldCreateCycle(_)
        )
    }

    /// Text for the `ERROR` line sent to the peer.
    pub fn peer_notice(&self) -> String {
        match self {
            Self::Transport(_) => "Transport error".to_string(),
            Self::Closed(reason) => reason.clone(),
            other => format!("Closing link: {}", other),
        }
    }
}

impl From<ProtocolError> for LinkError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Transport(e),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

impl From<TopologyError> for LinkError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::DuplicateServer(s) => Self::DuplicateServer(s),
            TopologyError::WouldCreateCycle(s) => Self::WouldCreateCycle(s),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}

// ============================================================================
// Topology Errors
// ============================================================================

/// Errors from structural changes to the server tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("server already exists: {0}")]
    DuplicateServer(String),

    #[error("{0} would become its own ancestor")]
    WouldCreateCycle(String),

    #[error("no such server: {0}")]
    NotFound(String),

    #[error("unknown parent server: {0}")]
    UnknownParent(String),

    #[error("the local server cannot be removed")]
    LocalServer,
}

// ============================================================================
// Routing Errors
// ============================================================================

/// A single command could not be routed. Never fatal for the link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

// ============================================================================
// Operator Command Errors
// ============================================================================

/// Errors from operator-initiated CONNECT and SQUIT.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no link block for {0}")]
    NoSuchLink(String),

    #[error("no such server: {0}")]
    NoSuchServer(String),

    #[error("{0} is already linked")]
    AlreadyLinked(String),

    #[error("{0} is not directly linked")]
    NotDirect(ServerId),

    #[error("cannot squit the local server")]
    LocalServer,

    #[error("server is shutting down")]
    ShuttingDown,
}
