//! Request context and rejection outcomes shared by every gate.

use crate::auth::models::Claims;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

const BEARER_SCHEME: &str = "Bearer";
const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// What the gates know about one inbound request. Each gate takes it by value
/// and hands back a (possibly enriched) copy.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Resolved caller address, when any is known.
    pub client_addr: Option<IpAddr>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Bearer token accepted by the credential gate, pending verification.
    pub credential: Option<String>,
    /// Claims of a verified session token.
    pub identity: Option<Claims>,
}

impl RequestContext {
    pub fn new(client_addr: Option<IpAddr>, authorization: Option<String>) -> Self {
        Self {
            client_addr,
            authorization,
            ..Self::default()
        }
    }

    /// Build a context from request headers and the socket peer address.
    ///
    /// Forwarding headers are only honoured when `trust_proxy_headers` is set.
    pub fn from_headers(
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        trust_proxy_headers: bool,
    ) -> Self {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

        let client_addr = if trust_proxy_headers {
            forwarded_addr(headers).or(peer)
        } else {
            peer
        };

        Self::new(client_addr, authorization)
    }

    /// Key the limiter meters this request under: `user:<sub>` once an
    /// identity is attached, otherwise the caller address.
    pub fn rate_key(&self) -> String {
        match (&self.identity, self.client_addr) {
            (Some(claims), _) => format!("user:{}", claims.subject()),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

fn forwarded_addr(headers: &HeaderMap) -> Option<IpAddr> {
    let first_forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    first_forwarded.or_else(|| {
        headers
            .get(REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Extract the token from `Bearer <token>`.
///
/// The value must split on single spaces into exactly two fields, the first
/// being the `Bearer` scheme and the second non-empty.
pub fn parse_bearer(value: &str) -> Result<&str, Rejection> {
    let mut fields = value.split(' ');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(BEARER_SCHEME), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(Rejection::MalformedHeader),
    }
}

/// Fine-grained permission checked after authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Identity carries the creator flag.
    Creator,
    /// Identity role is `admin`.
    Administrator,
}

impl Capability {
    pub fn granted_to(&self, claims: &Claims) -> bool {
        match self {
            Capability::Creator => claims.is_creator(),
            Capability::Administrator => claims.is_admin(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Creator => "creator",
            Capability::Administrator => "admin",
        }
    }
}

/// Why a request was turned away. Exactly one per rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("rate limit exceeded: {limit} requests per {window:?}")]
    RateLimitExceeded { limit: u32, window: Duration },

    #[error("authorization header required")]
    MissingCredential,

    #[error("invalid authorization header format")]
    MalformedHeader,

    #[error("invalid or expired token ({cause})")]
    InvalidCredential { cause: &'static str },

    #[error("authentication required")]
    Unauthenticated,

    #[error("{} access required", .0.as_str())]
    InsufficientCapability(Capability),

    #[error("identity provider unavailable")]
    ProviderUnavailable,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::MissingCredential
            | Rejection::MalformedHeader
            | Rejection::InvalidCredential { .. }
            | Rejection::Unauthenticated => StatusCode::UNAUTHORIZED,
            Rejection::InsufficientCapability(_) => StatusCode::FORBIDDEN,
            Rejection::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Rejection::MissingCredential => "missing_credential",
            Rejection::MalformedHeader => "malformed_header",
            Rejection::InvalidCredential { .. } => "invalid_credential",
            Rejection::Unauthenticated => "unauthenticated",
            Rejection::InsufficientCapability(_) => "insufficient_capability",
            Rejection::ProviderUnavailable => "provider_unavailable",
        }
    }

    /// Client-facing message. Token failure causes stay server-side.
    pub fn message(&self) -> String {
        match self {
            Rejection::RateLimitExceeded { limit, window } => format!(
                "Too many requests. Limit: {} per {}s",
                limit,
                window.as_secs()
            ),
            Rejection::MissingCredential => "Authorization header required".to_string(),
            Rejection::MalformedHeader => {
                "Invalid authorization header format. Use: Bearer {token}".to_string()
            }
            Rejection::InvalidCredential { .. } => "Invalid or expired token".to_string(),
            Rejection::Unauthenticated => "Authentication required".to_string(),
            Rejection::InsufficientCapability(Capability::Creator) => {
                "Creator access required".to_string()
            }
            Rejection::InsufficientCapability(Capability::Administrator) => {
                "Admin access required".to_string()
            }
            Rejection::ProviderUnavailable => {
                "Identity provider is unavailable, try again later".to_string()
            }
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.reason(),
            "message": self.message(),
            "success": false,
        });

        (self.status(), axum::Json(body)).into_response()
    }
}
