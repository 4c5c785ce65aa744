//! Authentication Module
//! Mission: Issue and verify session tokens, resolve identities, and gate routes

pub mod api;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod user_store;

pub use api::AuthState;
pub use error::{TokenError, TokenResult};
pub use jwt::JwtHandler;
pub use middleware::{authorize, CurrentUser, MaybeUser};
pub use user_store::{IdentityDirectory, UserStore};
