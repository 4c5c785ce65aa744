//! Authorization pipeline.
//!
//! A request passes through an ordered list of gates. Each gate either
//! forwards the request context (possibly enriched) or rejects it; the
//! executor stops at the first rejection. Gates always run in stage order:
//! throttle, credential, verification, capability.

pub mod context;
pub mod gates;

pub use context::{parse_bearer, Capability, Rejection, RequestContext};
pub use gates::{AuthMode, CapabilityGate, CredentialGate, ThrottleGate, VerificationGate};

use crate::auth::jwt::JwtHandler;
use crate::middleware::rate_limit::{RateLimitConfig, SlidingWindowLimiter};
use std::sync::Arc;

/// Position of a gate in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Throttle,
    Credential,
    Verification,
    Capability,
}

/// Result of a single gate.
#[derive(Debug)]
pub enum GateOutcome {
    Forward(RequestContext),
    Reject(Rejection),
}

/// One pass/reject decision step.
pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn evaluate(&self, ctx: RequestContext) -> GateOutcome;
}

/// Terminal outcome of the whole pipeline.
#[derive(Debug)]
pub enum Verdict {
    /// Forwarded with a verified identity attached.
    Authenticated(RequestContext),
    /// Forwarded without an identity (optional auth or public route).
    Anonymous(RequestContext),
    Rejected(Rejection),
}

impl Verdict {
    pub fn into_result(self) -> Result<RequestContext, Rejection> {
        match self {
            Verdict::Authenticated(ctx) | Verdict::Anonymous(ctx) => Ok(ctx),
            Verdict::Rejected(rejection) => Err(rejection),
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected(_))
    }
}

/// Ordered gate chain for one class of route.
pub struct Pipeline {
    gates: Vec<Box<dyn Gate>>,
    rate_limit: Option<RateLimitConfig>,
    trust_proxy_headers: bool,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run every gate once, in order, stopping at the first rejection.
    pub fn run(&self, ctx: RequestContext) -> Verdict {
        let mut ctx = ctx;
        for gate in &self.gates {
            match gate.evaluate(ctx) {
                GateOutcome::Forward(next) => ctx = next,
                GateOutcome::Reject(rejection) => return Verdict::Rejected(rejection),
            }
        }

        if ctx.identity.is_some() {
            Verdict::Authenticated(ctx)
        } else {
            Verdict::Anonymous(ctx)
        }
    }

    /// Limit advertised on responses, present when the chain throttles.
    pub fn rate_limit(&self) -> Option<RateLimitConfig> {
        self.rate_limit
    }

    pub fn trusts_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    gates: Vec<Box<dyn Gate>>,
    rate_limit: Option<RateLimitConfig>,
    trust_proxy_headers: bool,
}

impl PipelineBuilder {
    /// Meter callers against `limiter` with the given budget.
    pub fn throttle(mut self, limiter: Arc<SlidingWindowLimiter>, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self.gates.push(Box::new(ThrottleGate::new(limiter, config)));
        self
    }

    /// Extract and verify a bearer session token.
    pub fn authenticate(mut self, tokens: Arc<JwtHandler>, mode: AuthMode) -> Self {
        self.gates.push(Box::new(CredentialGate::new(mode)));
        self.gates.push(Box::new(VerificationGate::new(tokens, mode)));
        self
    }

    pub fn require(mut self, capability: Capability) -> Self {
        self.gates.push(Box::new(CapabilityGate::new(capability)));
        self
    }

    pub fn gate(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    /// Resolve the caller address from `X-Forwarded-For` / `X-Real-IP`.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub fn build(mut self) -> Pipeline {
        // Stable: gates within a stage keep their insertion order.
        self.gates.sort_by_key(|g| g.stage());
        Pipeline {
            gates: self.gates,
            rate_limit: self.rate_limit,
            trust_proxy_headers: self.trust_proxy_headers,
        }
    }
}
