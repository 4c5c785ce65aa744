//! JWT Token Handler
//! Mission: Issue and verify signed session and renewal tokens
//!
//! Both token kinds are HS256 JWTs signed with the process secret. Temporal
//! claims are checked here against the injected [`Clock`](crate::clock::Clock)
//! rather than inside `jsonwebtoken`, which only ever sees system time.

use crate::auth::error::{TokenError, TokenResult};
use crate::auth::models::{unix_to_datetime, Claims, Identity, IssuedToken, RenewalClaims, TokenKind};
use crate::clock::{SharedClock, SystemClock};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default session lifetime: one hour.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Renewal lifetime: 30 days. Not configurable.
pub const RENEWAL_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_ttl: Duration,
    clock: SharedClock,
}

impl JwtHandler {
    /// Create a handler signing with `secret`, issuing sessions valid for
    /// `session_ttl`, and reading time from `clock`.
    pub fn new(secret: impl AsRef<[u8]>, session_ttl: Duration, clock: SharedClock) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            session_ttl,
            clock,
        }
    }

    /// Create a handler on the system clock with the default session lifetime.
    pub fn with_defaults(secret: impl AsRef<[u8]>) -> Self {
        Self::new(secret, DEFAULT_SESSION_TTL, SystemClock::shared())
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Sign a session token carrying the full identity.
    pub fn issue_session(&self, identity: &Identity) -> TokenResult<IssuedToken> {
        let (iat, exp) = self.window(self.session_ttl)?;

        let claims = Claims {
            identity: identity.clone(),
            iat,
            exp,
            nbf: iat,
        };

        debug!(
            sub = %identity.sub,
            username = %identity.username,
            role = identity.role.as_str(),
            expires_in_secs = self.session_ttl.as_secs(),
            "Issuing session token"
        );

        self.sign(&claims, exp, self.session_ttl)
    }

    /// Sign a renewal token carrying only the subject.
    pub fn issue_renewal(&self, subject: &str) -> TokenResult<IssuedToken> {
        let (iat, exp) = self.window(RENEWAL_TTL)?;

        let claims = RenewalClaims {
            sub: subject.to_string(),
            iat,
            exp,
            nbf: iat,
        };

        debug!(sub = %subject, "Issuing renewal token");

        self.sign(&claims, exp, RENEWAL_TTL)
    }

    /// Verify a session token and return its claims.
    ///
    /// Renewal tokens are refused here: their payload lacks the identity
    /// fields and fails to decode as [`Claims`].
    pub fn verify_session(&self, token: &str) -> TokenResult<Claims> {
        let claims: Claims = self.decode(token, TokenKind::Session)?;
        self.check_window(claims.iat, claims.exp, claims.nbf)?;

        debug!(sub = %claims.identity.sub, "Validated session token");

        Ok(claims)
    }

    /// Verify a renewal token and return its subject.
    pub fn verify_renewal(&self, token: &str) -> TokenResult<String> {
        let claims: RenewalClaims = self.decode(token, TokenKind::Renewal)?;
        self.check_window(claims.iat, claims.exp, claims.nbf)?;

        if claims.sub.is_empty() {
            return Err(TokenError::Malformed("empty subject".to_string()));
        }

        debug!(sub = %claims.sub, "Validated renewal token");

        Ok(claims.sub)
    }

    fn window(&self, ttl: Duration) -> TokenResult<(i64, i64)> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| TokenError::SigningFailure("token lifetime out of range".to_string()))?;
        if ttl_secs <= 0 {
            return Err(TokenError::SigningFailure(
                "token lifetime must be at least one second".to_string(),
            ));
        }

        let iat = self.clock.now().timestamp();
        let exp = iat
            .checked_add(ttl_secs)
            .ok_or_else(|| TokenError::SigningFailure("expiry overflows".to_string()))?;

        Ok((iat, exp))
    }

    fn sign<T: serde::Serialize>(
        &self,
        claims: &T,
        exp: i64,
        ttl: Duration,
    ) -> TokenResult<IssuedToken> {
        let token = encode(&Header::new(ALGORITHM), claims, &self.encoding_key)
            .map_err(|e| TokenError::SigningFailure(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_at: unix_to_datetime(exp),
            expires_in: ttl.as_secs(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, token: &str, kind: TokenKind) -> TokenResult<T> {
        decode::<T>(token, &self.decoding_key, &validation())
            .map(|data| data.claims)
            .map_err(|e| {
                let err = TokenError::from_decode(e);
                debug!(kind = kind.as_str(), reason = err.code(), "Rejected token");
                err
            })
    }

    fn check_window(&self, iat: i64, exp: i64, nbf: i64) -> TokenResult<()> {
        if !(exp > iat && iat >= nbf) {
            return Err(TokenError::Malformed(
                "inconsistent validity window".to_string(),
            ));
        }

        let now = self.clock.now().timestamp();
        if now >= exp {
            return Err(TokenError::Expired);
        }
        if now < nbf {
            return Err(TokenError::NotYetValid);
        }

        Ok(())
    }
}

/// Signature, algorithm and claim presence only; time is checked by the caller.
fn validation() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "nbf", "sub"]);
    validation
}
