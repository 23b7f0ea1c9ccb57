//! Error taxonomy for the Reaper platform.
//!
//! Variants line up with the caller-visible error codes of the decision RPC
//! and control plane. Policy evaluation failures (condition errors, missing
//! attributes) are deliberately *not* represented here: they never become a
//! caller-visible error, they cause a rule to be skipped and are recorded in
//! `policy-engine`'s diagnostic counters instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaperError>;

#[derive(Error, Debug)]
pub enum ReaperError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    #[error("policy already exists: {name}")]
    AlreadyExists { name: String },

    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("delegation not found: {delegation_id}")]
    DelegationNotFound { delegation_id: String },

    #[error("version not found: {version}")]
    VersionNotFound { version: u64 },

    #[error("invalid policy definition: {reason}")]
    InvalidPolicy { reason: String },

    #[error("policy evaluation failed: {reason}")]
    EvaluationError { reason: String },

    #[error("agent communication failed: {reason}")]
    AgentCommunicationError { reason: String },

    #[error("platform operation failed: {reason}")]
    PlatformError { reason: String },

    #[error("request rejected: rate limit exceeded")]
    Overloaded,

    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {reason}")]
    Internal { reason: String },

    #[error("already watching")]
    AlreadyWatching,

    #[error("delegation chain invalid: {reason}")]
    DelegationInvalid { reason: String },

    #[error("serialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReaperError {
    /// Stable code surfaced as `error.code` in the control plane's wrapped
    /// JSON responses and as the decision RPC's status.
    pub fn code(&self) -> &'static str {
        match self {
            ReaperError::InvalidInput { .. }
            | ReaperError::InvalidPolicy { .. }
            | ReaperError::DelegationInvalid { .. }
            | ReaperError::SerializationError { .. } => "InvalidArgument",
            ReaperError::PolicyNotFound { .. }
            | ReaperError::AgentNotFound { .. }
            | ReaperError::DelegationNotFound { .. }
            | ReaperError::VersionNotFound { .. } => "NotFound",
            ReaperError::AlreadyExists { .. } | ReaperError::AlreadyWatching => "AlreadyExists",
            ReaperError::Overloaded => "ResourceExhausted",
            ReaperError::Unavailable { .. } => "Unavailable",
            ReaperError::Cancelled => "Cancelled",
            ReaperError::DeadlineExceeded => "DeadlineExceeded",
            ReaperError::EvaluationError { .. }
            | ReaperError::AgentCommunicationError { .. }
            | ReaperError::PlatformError { .. }
            | ReaperError::Internal { .. }
            | ReaperError::Io(_) => "Internal",
        }
    }
}
