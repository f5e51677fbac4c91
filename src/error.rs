//! Error types for Tether agent operations

use crate::config::ConfigError;
use crate::protocol::CodecError;
use crate::transport::TransportError;
use thiserror::Error;

/// Kind of plug, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugKind {
    Input,
    Output,
}

impl std::fmt::Display for PlugKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlugKind::Input => f.write_str("input"),
            PlugKind::Output => f.write_str("output"),
        }
    }
}

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("An {kind} plug named \"{name}\" already exists")]
    DuplicateName { kind: PlugKind, name: String },

    #[error("Listener is already registered on plug \"{plug}\"")]
    DuplicateListener { plug: String },

    #[error("Operation not allowed while {state}")]
    InvalidState { state: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AgentError {
    /// Create invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create duplicate plug name error
    pub fn duplicate_name<S: Into<String>>(kind: PlugKind, name: S) -> Self {
        Self::DuplicateName {
            kind,
            name: name.into(),
        }
    }

    pub fn duplicate_listener<S: Into<String>>(plug: S) -> Self {
        Self::DuplicateListener { plug: plug.into() }
    }

    pub fn invalid_state<S: ToString>(state: S) -> Self {
        Self::InvalidState {
            state: state.to_string(),
        }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
