//! Authentication API Endpoints
//! Mission: Exchange passwords, renewal tokens and external sign-ins for fresh
//! session tokens

use crate::auth::{
    jwt::JwtHandler,
    middleware::CurrentUser,
    models::{
        check_username, AccountType, ApiResponse, AuthResponse, ExternalLoginRequest, Identity,
        LoginRequest, RefreshRequest, RegisterRequest, UpdateProfileRequest, UserResponse,
    },
    provider::{verify_external, ExternalCredential, IdentityProvider},
    user_store::{DirectoryError, IdentityDirectory, NewAccount},
};
use crate::pipeline::Rejection;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub jwt_handler: Arc<JwtHandler>,
    pub user_store: Arc<dyn IdentityDirectory>,
    /// External sign-in is disabled when unset
    pub provider: Option<Arc<dyn IdentityProvider>>,
    pub provider_timeout: Duration,
}

impl AuthState {
    pub fn new(jwt_handler: Arc<JwtHandler>, user_store: Arc<dyn IdentityDirectory>) -> Self {
        Self {
            jwt_handler,
            user_store,
            provider: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        self.provider = Some(provider);
        self.provider_timeout = timeout;
        self
    }

    /// Issue a session token plus a fresh renewal token for `identity`.
    fn issue_pair(&self, identity: &Identity) -> Result<AuthResponse, AuthApiError> {
        let session = self.jwt_handler.issue_session(identity).map_err(|e| {
            error!(sub = %identity.sub, error = %e, "Failed to sign session token");
            AuthApiError::InternalError
        })?;
        let renewal = self.jwt_handler.issue_renewal(&identity.sub).map_err(|e| {
            error!(sub = %identity.sub, error = %e, "Failed to sign renewal token");
            AuthApiError::InternalError
        })?;

        Ok(AuthResponse {
            user: UserResponse::from_identity(identity),
            token: session.token,
            refresh_token: renewal.token,
            expires_in: session.expires_in,
        })
    }
}

/// Run a blocking directory call (password hashing) off the async workers.
async fn with_directory<T, F>(state: &AuthState, f: F) -> Result<T, AuthApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn IdentityDirectory) -> Result<T, DirectoryError> + Send + 'static,
{
    let directory = state.user_store.clone();
    tokio::task::spawn_blocking(move || f(&*directory))
        .await
        .map_err(|e| {
            error!(error = %e, "Directory task failed");
            AuthApiError::InternalError
        })?
        .map_err(AuthApiError::from)
}

/// Registration endpoint - POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), AuthApiError> {
    payload.validate().map_err(AuthApiError::Validation)?;

    let account = NewAccount {
        username: payload.username.trim().to_string(),
        email: payload.email.trim().to_string(),
        password: payload.password,
        is_creator: payload.account_type == AccountType::Creator,
    };
    let identity = with_directory(&state, move |dir| dir.create_account(account)).await?;

    info!(sub = %identity.sub, "Account registered");

    let pair = state.issue_pair(&identity)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(pair, "Account created successfully")),
    ))
}

/// Password login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, AuthApiError> {
    payload.validate().map_err(AuthApiError::Validation)?;

    let email = payload.email.trim().to_string();
    let identity = with_directory(&state, move |dir| {
        dir.verify_password(&email, &payload.password)
    })
    .await?
    .ok_or_else(|| {
        debug!("Password login refused");
        AuthApiError::InvalidCredentials
    })?;

    info!(sub = %identity.sub, "Password login succeeded");

    let pair = state.issue_pair(&identity)?;
    Ok(Json(ApiResponse::ok(pair, "Login successful")))
}

/// Profile update endpoint - PUT /api/users/me
///
/// Tokens already issued keep the old username until they are renewed.
pub async fn update_profile(
    State(state): State<AuthState>,
    CurrentUser(claims): CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserResponse>>, AuthApiError> {
    let username = payload.username.trim();
    check_username(username).map_err(AuthApiError::Validation)?;

    let identity = state.user_store.rename(claims.subject(), username)?;
    debug!(sub = %identity.sub, "Profile updated");

    Ok(Json(ApiResponse::ok(
        UserResponse::from_identity(&identity),
        "Profile updated successfully",
    )))
}

/// Renewal endpoint - POST /api/auth/refresh
///
/// The renewal token is rotated on every exchange.
pub async fn refresh(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, AuthApiError> {
    let subject = state
        .jwt_handler
        .verify_renewal(&payload.refresh_token)
        .map_err(|e| {
            debug!(cause = e.code(), "Renewal token rejected");
            AuthApiError::Rejected(Rejection::InvalidCredential { cause: e.code() })
        })?;

    let identity = state.user_store.lookup(&subject).ok_or_else(|| {
        debug!(sub = %subject, "Renewal token names an unknown subject");
        AuthApiError::Rejected(Rejection::InvalidCredential {
            cause: "unknown_subject",
        })
    })?;

    let pair = state.issue_pair(&identity)?;
    debug!(sub = %identity.sub, "Session renewed");

    Ok(Json(ApiResponse::ok(pair, "Token refreshed successfully")))
}

/// External sign-in endpoint - POST /api/auth/google
pub async fn google_login(
    State(state): State<AuthState>,
    Json(payload): Json<ExternalLoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, AuthApiError> {
    let provider = state
        .provider
        .as_deref()
        .ok_or(AuthApiError::ProviderNotConfigured)?;

    let credential = ExternalCredential::pick(payload.id_token, payload.access_token)
        .ok_or_else(|| {
            AuthApiError::Validation("Either idToken or accessToken is required".to_string())
        })?;

    let external = verify_external(provider, &credential, state.provider_timeout)
        .await
        .map_err(AuthApiError::Rejected)?;

    let subject = subject_for(provider.name(), &external.provider_subject);
    let identity = state.user_store.register_external(
        &subject,
        &external.display_name(),
        &external.email,
        external.email_verified,
    );

    info!(
        sub = %identity.sub,
        provider = provider.name(),
        kind = credential.kind(),
        email_verified = external.email_verified,
        "External sign-in succeeded"
    );

    let pair = state.issue_pair(&identity)?;
    Ok(Json(ApiResponse::ok(pair, "Login successful")))
}

/// Stable local subject for an external account.
pub fn subject_for(provider: &str, provider_subject: &str) -> String {
    let name = format!("{provider}:{provider_subject}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Get current user info - GET /api/users/me
/// Built from the verified claims; no directory lookup.
pub async fn get_current_user(
    CurrentUser(claims): CurrentUser,
) -> Json<ApiResponse<UserResponse>> {
    Json(ApiResponse::ok(
        UserResponse::from_identity(&claims.identity),
        "Current user",
    ))
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    Rejected(Rejection),
    Validation(String),
    InvalidCredentials,
    EmailTaken,
    UsernameTaken,
    UserNotFound,
    ProviderNotConfigured,
    InternalError,
}

impl From<Rejection> for AuthApiError {
    fn from(rejection: Rejection) -> Self {
        AuthApiError::Rejected(rejection)
    }
}

impl From<DirectoryError> for AuthApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::EmailTaken => AuthApiError::EmailTaken,
            DirectoryError::UsernameTaken => AuthApiError::UsernameTaken,
            DirectoryError::NotFound => AuthApiError::UserNotFound,
            DirectoryError::Hashing(reason) => {
                warn!(%reason, "Password hashing failed");
                AuthApiError::InternalError
            }
        }
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthApiError::Rejected(rejection) => return rejection.into_response(),
            AuthApiError::Validation(message) => {
                let body = json!({
                    "error": "validation_failed",
                    "message": message,
                    "success": false,
                });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AuthApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "invalid_credentials",
                "Email or password is incorrect",
            ),
            AuthApiError::EmailTaken => (
                StatusCode::CONFLICT,
                "email_taken",
                "An account with this email already exists",
            ),
            AuthApiError::UsernameTaken => (
                StatusCode::CONFLICT,
                "username_taken",
                "This username is not available",
            ),
            AuthApiError::UserNotFound => (
                StatusCode::NOT_FOUND,
                "user_not_found",
                "User not found",
            ),
            AuthApiError::ProviderNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_not_configured",
                "External sign-in is not configured",
            ),
            AuthApiError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        };

        let body = json!({
            "error": code,
            "message": message,
            "success": false,
        });
        (status, Json(body)).into_response()
    }
}
