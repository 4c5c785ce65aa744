//! HTTP surface
//! Mission: Mount the auth endpoints and the gated demonstration routes

use crate::auth::{
    api::{self as auth_api, AuthState},
    authorize,
    jwt::JwtHandler,
    models::{ApiResponse, UserResponse},
    provider::{GoogleTokenInfo, IdentityProvider},
    user_store::IdentityDirectory,
    CurrentUser, MaybeUser,
};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::middleware::{
    rate_limit::{RateLimitConfig, SlidingWindowLimiter},
    request_logging,
};
use crate::pipeline::{AuthMode, Capability, Pipeline};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    /// One limiter for every throttled route
    pub limiter: Arc<SlidingWindowLimiter>,
    pub rate_limit: RateLimitConfig,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(auth: AuthState, limiter: Arc<SlidingWindowLimiter>, rate_limit: RateLimitConfig) -> Self {
        Self {
            auth,
            limiter,
            rate_limit,
            trust_proxy_headers: false,
        }
    }

    /// Wire the token manager, limiter and (optionally) Google sign-in from `config`.
    pub fn from_config(
        config: &Config,
        clock: SharedClock,
        user_store: Arc<dyn IdentityDirectory>,
        http_client: reqwest::Client,
    ) -> Self {
        let jwt_handler = Arc::new(JwtHandler::new(
            &config.jwt_secret,
            config.session_ttl,
            clock.clone(),
        ));
        let mut auth = AuthState::new(jwt_handler, user_store);

        if let Some(client_id) = &config.google_client_id {
            let provider: Arc<dyn IdentityProvider> =
                Arc::new(GoogleTokenInfo::new(http_client, client_id.clone()));
            auth = auth.with_provider(provider, config.provider_timeout);
            info!("Google sign-in enabled");
        }

        Self {
            auth,
            limiter: Arc::new(SlidingWindowLimiter::new(clock)),
            rate_limit: config.rate_limit,
            trust_proxy_headers: config.trust_proxy_headers,
        }
    }

    fn pipeline(&self, auth: Option<AuthMode>, capability: Option<Capability>) -> Arc<Pipeline> {
        let mut builder = Pipeline::builder()
            .trust_proxy_headers(self.trust_proxy_headers)
            .throttle(self.limiter.clone(), self.rate_limit);
        if let Some(mode) = auth {
            builder = builder.authenticate(self.auth.jwt_handler.clone(), mode);
        }
        if let Some(capability) = capability {
            builder = builder.require(capability);
        }
        Arc::new(builder.build())
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let throttled = state.pipeline(None, None);
    let optional = state.pipeline(Some(AuthMode::Optional), None);
    let required = state.pipeline(Some(AuthMode::Required), None);
    let creator_only = state.pipeline(Some(AuthMode::Required), Some(Capability::Creator));
    let admin_only = state.pipeline(Some(AuthMode::Required), Some(Capability::Administrator));

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route_layer(middleware::from_fn_with_state(throttled.clone(), authorize));

    let auth_routes = Router::new()
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/auth/refresh", post(auth_api::refresh))
        .route("/api/auth/google", post(auth_api::google_login))
        .route_layer(middleware::from_fn_with_state(throttled, authorize))
        .with_state(state.auth.clone());

    let feed_routes = Router::new()
        .route("/api/posts", get(list_posts))
        .route_layer(middleware::from_fn_with_state(optional, authorize));

    let user_routes = Router::new()
        .route(
            "/api/users/me",
            get(auth_api::get_current_user).put(auth_api::update_profile),
        )
        .route_layer(middleware::from_fn_with_state(required, authorize))
        .with_state(state.auth.clone());

    let creator_routes = Router::new()
        .route("/api/products", post(create_product))
        .route_layer(middleware::from_fn_with_state(creator_only, authorize));

    let admin_routes = Router::new()
        .route("/api/admin/stats", get(admin_stats))
        .route_layer(middleware::from_fn_with_state(admin_only, authorize))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(feed_routes)
        .merge(user_routes)
        .merge(creator_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Public feed; signed-in viewers are echoed back.
async fn list_posts(MaybeUser(viewer): MaybeUser) -> Json<ApiResponse<PostsResponse>> {
    let posts = vec![
        Post {
            id: 1,
            title: "Welcome".to_string(),
        },
        Post {
            id: 2,
            title: "Release notes".to_string(),
        },
    ];

    Json(ApiResponse::ok(
        PostsResponse {
            viewer: viewer.map(|claims| UserResponse::from_identity(&claims.identity)),
            posts,
        },
        "Posts retrieved successfully",
    ))
}

/// Creators only
async fn create_product(
    CurrentUser(claims): CurrentUser,
    Json(payload): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Product>>), ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Product name is required".to_string()));
    }

    let product = Product {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        creator_id: claims.subject().to_string(),
    };
    info!(product = %product.id, creator = %product.creator_id, "Product created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(product, "Product created successfully")),
    ))
}

/// Administrators only
async fn admin_stats(
    State(state): State<AppState>,
    CurrentUser(claims): CurrentUser,
) -> Json<ApiResponse<AdminStats>> {
    Json(ApiResponse::ok(
        AdminStats {
            tracked_clients: state.limiter.tracked_keys(),
            rate_limit: state.rate_limit.max_requests,
            rate_limit_window: state.rate_limit.window_label(),
            requested_by: claims.subject().to_string(),
        },
        "Stats retrieved successfully",
    ))
}

// ===== Request/Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct Post {
    id: u64,
    title: String,
}

#[derive(Debug, Serialize)]
struct PostsResponse {
    viewer: Option<UserResponse>,
    posts: Vec<Post>,
}

#[derive(Deserialize)]
struct CreateProductRequest {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Product {
    id: String,
    name: String,
    creator_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminStats {
    tracked_clients: usize,
    rate_limit: u32,
    rate_limit_window: String,
    requested_by: String,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };

        let body = Json(json!({
            "error": code,
            "message": message,
            "success": false,
        }));

        (status, body).into_response()
    }
}
