//! The individual authorization gates.

use super::context::{parse_bearer, Capability, Rejection, RequestContext};
use super::{Gate, GateOutcome, Stage};
use crate::auth::jwt::JwtHandler;
use crate::middleware::rate_limit::{RateLimitConfig, SlidingWindowLimiter};
use std::sync::Arc;

/// Whether a route insists on an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Missing or bad credentials terminate the request.
    Required,
    /// Missing or bad credentials forward the request without an identity.
    Optional,
}

/// Meters the caller against the shared sliding-window limiter.
///
/// Runs before verification, so the key is the caller address even for
/// requests that go on to authenticate.
pub struct ThrottleGate {
    limiter: Arc<SlidingWindowLimiter>,
    config: RateLimitConfig,
}

impl ThrottleGate {
    pub fn new(limiter: Arc<SlidingWindowLimiter>, config: RateLimitConfig) -> Self {
        Self { limiter, config }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }
}

impl Gate for ThrottleGate {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn stage(&self) -> Stage {
        Stage::Throttle
    }

    fn evaluate(&self, ctx: RequestContext) -> GateOutcome {
        let key = ctx.rate_key();
        if self
            .limiter
            .allow(&key, self.config.max_requests, self.config.window)
        {
            GateOutcome::Forward(ctx)
        } else {
            GateOutcome::Reject(Rejection::RateLimitExceeded {
                limit: self.config.max_requests,
                window: self.config.window,
            })
        }
    }
}

/// Requires a well-formed `Authorization: Bearer <token>` header.
pub struct CredentialGate {
    mode: AuthMode,
}

impl CredentialGate {
    pub fn new(mode: AuthMode) -> Self {
        Self { mode }
    }
}

impl Gate for CredentialGate {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn stage(&self) -> Stage {
        Stage::Credential
    }

    fn evaluate(&self, mut ctx: RequestContext) -> GateOutcome {
        let header = ctx.authorization.as_deref().filter(|v| !v.is_empty());

        let parsed = match header {
            None => Err(Rejection::MissingCredential),
            Some(value) => parse_bearer(value).map(str::to_string),
        };

        match (parsed, self.mode) {
            (Ok(token), _) => {
                ctx.credential = Some(token);
                GateOutcome::Forward(ctx)
            }
            (Err(rejection), AuthMode::Required) => GateOutcome::Reject(rejection),
            (Err(_), AuthMode::Optional) => GateOutcome::Forward(ctx),
        }
    }
}

/// Verifies the pending bearer token as a session token.
pub struct VerificationGate {
    tokens: Arc<JwtHandler>,
    mode: AuthMode,
}

impl VerificationGate {
    pub fn new(tokens: Arc<JwtHandler>, mode: AuthMode) -> Self {
        Self { tokens, mode }
    }
}

impl Gate for VerificationGate {
    fn name(&self) -> &'static str {
        "verification"
    }

    fn stage(&self) -> Stage {
        Stage::Verification
    }

    fn evaluate(&self, mut ctx: RequestContext) -> GateOutcome {
        let Some(token) = ctx.credential.take() else {
            return match self.mode {
                AuthMode::Required => GateOutcome::Reject(Rejection::MissingCredential),
                AuthMode::Optional => GateOutcome::Forward(ctx),
            };
        };

        match (self.tokens.verify_session(&token), self.mode) {
            (Ok(claims), _) => {
                ctx.identity = Some(claims);
                GateOutcome::Forward(ctx)
            }
            (Err(err), AuthMode::Required) => {
                GateOutcome::Reject(Rejection::InvalidCredential { cause: err.code() })
            }
            (Err(_), AuthMode::Optional) => GateOutcome::Forward(ctx),
        }
    }
}

/// Checks a capability on the identity attached by earlier gates.
pub struct CapabilityGate {
    capability: Capability,
}

impl CapabilityGate {
    pub fn new(capability: Capability) -> Self {
        Self { capability }
    }
}

impl Gate for CapabilityGate {
    fn name(&self) -> &'static str {
        match self.capability {
            Capability::Creator => "creator-only",
            Capability::Administrator => "admin-only",
        }
    }

    fn stage(&self) -> Stage {
        Stage::Capability
    }

    fn evaluate(&self, ctx: RequestContext) -> GateOutcome {
        match &ctx.identity {
            None => GateOutcome::Reject(Rejection::Unauthenticated),
            Some(claims) if !self.capability.granted_to(claims) => {
                GateOutcome::Reject(Rejection::InsufficientCapability(self.capability))
            }
            Some(_) => GateOutcome::Forward(ctx),
        }
    }
}
