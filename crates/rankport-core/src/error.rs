//! Error types for Rankport.

use thiserror::Error;

/// Every failure the engine can surface.
///
/// The variant decides the status a caller sees; the payload is diagnostic
/// context. Only [`RankportError::public_message`] is safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankportError {
    /// Missing, malformed, mis-keyed or expired credential.
    #[error("unauthorized: {0}")]
    Auth(String),

    /// Valid credential, but wrong role, tenant, or a disqualified player.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Storage or transaction failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RankportError {
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }

    /// Message suitable for a client response. Internal details never leak.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".into(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RankportError>;
