//! Token errors
//!
//! Every variant is terminal for the request that produced it. Nothing here is
//! retried; callers collapse all verification failures into "unauthenticated".

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Token construction failed.
    #[error("failed to sign token: {0}")]
    SigningFailure(String),

    /// Wrong shape or claims for the token kind requested.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Tampered payload/signature, wrong secret or unexpected algorithm.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Valid signature, past its validity window.
    #[error("token has expired")]
    Expired,

    /// Valid signature, not-before still in the future.
    #[error("token is not yet valid")]
    NotYetValid,
}

pub type TokenResult<T> = std::result::Result<T, TokenError>;

impl TokenError {
    /// Stable machine-readable code, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::SigningFailure(_) => "signing_failure",
            TokenError::Malformed(_) => "malformed",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Expired => "expired",
            TokenError::NotYetValid => "not_yet_valid",
        }
    }

    pub(crate) fn from_decode(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}
