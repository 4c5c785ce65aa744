//! Authentication Middleware
//! Mission: Run the authorization pipeline in front of axum routes

use crate::auth::models::Claims;
use crate::pipeline::{Pipeline, Rejection, RequestContext, Verdict};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Gate a route with `pipeline`.
///
/// Use with `axum::middleware::from_fn_with_state(Arc<Pipeline>, authorize)`.
/// On success the verified [`Claims`] (if any) are placed in the request
/// extensions. Throttled routes always carry the rate-limit headers.
pub async fn authorize(
    State(pipeline): State<Arc<Pipeline>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let ctx = RequestContext::from_headers(req.headers(), peer, pipeline.trusts_proxy_headers());
    let client = ctx.rate_key();

    let mut response = match pipeline.run(ctx) {
        Verdict::Authenticated(ctx) => {
            if let Some(claims) = ctx.identity {
                req.extensions_mut().insert(claims);
            }
            next.run(req).await
        }
        Verdict::Anonymous(_) => next.run(req).await,
        Verdict::Rejected(rejection) => {
            log_rejection(&rejection, &client, req.uri().path());
            rejection.into_response()
        }
    };

    if let Some(config) = pipeline.rate_limit() {
        config.apply_headers(response.headers_mut());
    }

    response
}

fn log_rejection(rejection: &Rejection, client: &str, path: &str) {
    match rejection {
        Rejection::RateLimitExceeded { limit, window } => warn!(
            client = %client,
            path = %path,
            limit = *limit,
            window_secs = window.as_secs(),
            "Rate limit exceeded"
        ),
        other => debug!(
            client = %client,
            path = %path,
            reason = other.reason(),
            status = other.status().as_u16(),
            "Request rejected"
        ),
    }
}

/// Extract claims from request (use after [`authorize`])
pub fn extract_claims(req: &Request) -> Option<&Claims> {
    req.extensions().get::<Claims>()
}

/// Verified caller; rejects with 401 when no identity was attached.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(CurrentUser)
            .ok_or(Rejection::Unauthenticated)
    }
}

/// Caller identity when one was attached; never rejects.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Claims>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<Claims>().cloned()))
    }
}
