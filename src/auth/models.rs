//! Authentication Models
//! Mission: Define identity claims, token payloads and auth API bodies

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Roles carried in session tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "admin")]
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// Who a session token speaks for. Everything in [`Claims`] except the
/// temporal fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub sub: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    #[serde(rename = "isCreator")]
    pub is_creator: bool,
}

impl Identity {
    pub fn new(
        sub: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        role: UserRole,
        is_creator: bool,
    ) -> Self {
        Self {
            sub: sub.into(),
            username: username.into(),
            email: email.into(),
            role,
            is_creator,
        }
    }
}

/// Session token payload.
///
/// Timestamps are Unix seconds. A well-formed payload satisfies
/// `exp > iat >= nbf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub identity: Identity,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

impl Claims {
    pub fn subject(&self) -> &str {
        &self.identity.sub
    }

    pub fn role(&self) -> UserRole {
        self.identity.role
    }

    pub fn is_creator(&self) -> bool {
        self.identity.is_creator
    }

    pub fn is_admin(&self) -> bool {
        self.identity.role == UserRole::Admin
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        unix_to_datetime(self.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        unix_to_datetime(self.exp)
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        unix_to_datetime(self.nbf)
    }
}

/// Renewal token payload: subject and validity window only.
///
/// Unknown fields are refused so a session payload can never pass as a
/// renewal payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenewalClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

/// Which of the two token shapes an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Session,
    Renewal,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::Renewal => "renewal",
        }
    }
}

/// A freshly signed token and when it stops being valid.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry at issue time
    pub expires_in: u64,
}

/// Renewal request body - POST /api/auth/refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// External sign-in request body - POST /api/auth/google
///
/// Either an ID token or an OAuth access token; the ID token wins when both
/// are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLoginRequest {
    #[serde(default, alias = "id_token")]
    pub id_token: Option<String>,
    #[serde(default, alias = "access_token")]
    pub access_token: Option<String>,
}

/// Account types offered at registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Personal,
    Business,
    Creator,
}

/// Registration request body - POST /api/auth/register
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub account_type: AccountType,
}

pub const MIN_PASSWORD_LEN: usize = 8;

impl RegisterRequest {
    /// First failed field rule, if any.
    pub fn validate(&self) -> Result<(), String> {
        check_username(&self.username)?;
        if !looks_like_email(&self.email) {
            return Err("email must be a valid email address".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        if self.confirm_password != self.password {
            return Err("confirmPassword must match password".to_string());
        }
        check_length("firstName", &self.first_name, 2, 100)?;
        check_length("lastName", &self.last_name, 2, 100)
    }
}

/// Password login request body - POST /api/auth/login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), String> {
        if !looks_like_email(&self.email) {
            return Err("email must be a valid email address".to_string());
        }
        if self.password.is_empty() {
            return Err("password is required".to_string());
        }
        Ok(())
    }
}

/// Profile update body - PUT /api/users/me
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: String,
}

pub(crate) fn check_username(username: &str) -> Result<(), String> {
    check_length("username", username, 3, 50)
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(format!("{field} must be between {min} and {max} characters"));
    }
    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Token pair handed back after sign-in or renewal
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// User response (sanitized)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub is_creator: bool,
}

impl UserResponse {
    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            id: identity.sub.clone(),
            username: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role,
            is_creator: identity.is_creator,
        }
    }
}

/// Success envelope shared by the auth endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: message.into(),
            success: true,
        }
    }
}

pub(crate) fn unix_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
