//! Signed identity tokens (HS256 JWT).
//!
//! The minter owns the shared secret. Verification pins the MAC algorithm to
//! HS256: a token signed with any other algorithm is rejected outright, which
//! closes the classic algorithm-confusion hole. Verification failures map to
//! the machine-stable reasons `malformed`, `bad-signature`, `expired` and
//! `wrong-issuer`; the HTTP layer returns a uniform 401 either way but logs
//! the distinct reason.

use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// JWT claim set carried by every identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Display name
    pub name: String,
    /// Role names, possibly empty
    pub roles: Vec<String>,
    /// Issuer
    pub iss: String,
    /// Issued-at (Unix epoch seconds)
    pub iat: i64,
    /// Not-before (Unix epoch seconds)
    pub nbf: i64,
    /// Expires-at (Unix epoch seconds)
    pub exp: i64,
}

/// Verified identity bound to a request.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Subject (user id)
    pub subject: String,
    /// Display name
    pub display_name: String,
    /// Role names
    pub roles: Vec<String>,
}

impl Identity {
    /// True iff `required` is empty or any held role equals any required role.
    #[must_use]
    pub fn has_any_role(&self, required: &[&str]) -> bool {
        roles_match(&self.roles, required)
    }
}

/// True iff `required` is empty or any role in `roles` equals any required.
#[must_use]
pub fn roles_match(roles: &[String], required: &[&str]) -> bool {
    required.is_empty() || roles.iter().any(|r| required.iter().any(|q| r == q))
}

/// Mints and verifies identity tokens under a single symmetric secret.
pub struct TokenMinter {
    issuer: String,
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenMinter {
    /// Create a minter from the shared secret.
    #[must_use]
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            ttl,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token for `subject` valid from now until now + TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if JWT encoding fails.
    pub fn mint(&self, subject: &str, display: &str, roles: Vec<String>) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let claims = Claims {
            sub: subject.to_string(),
            name: display.to_string(),
            roles,
            iss: self.issuer.clone(),
            iat: now,
            nbf: now,
            exp: now + self.ttl.as_secs() as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Token encoding failed: {e}")))
    }

    /// Verify a token and return the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthorized` with reason `malformed`, `bad-signature`,
    /// `expired` or `wrong-issuer`.
    pub fn verify(&self, token: &str) -> Result<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "expired",
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => "bad-signature",
                ErrorKind::InvalidIssuer => "wrong-issuer",
                ErrorKind::ImmatureSignature => "not-yet-valid",
                _ => "malformed",
            };
            Error::Unauthorized(reason.to_string())
        })?;

        Ok(Identity {
            subject: data.claims.sub,
            display_name: data.claims.name,
            roles: data.claims.roles,
        })
    }

    /// Mint a fresh token preserving subject, display name and roles.
    ///
    /// # Errors
    ///
    /// Fails when the presented token does not verify.
    pub fn refresh(&self, token: &str) -> Result<String> {
        let identity = self.verify(token)?;
        self.mint(&identity.subject, &identity.display_name, identity.roles)
    }
}

/// Extract a bearer value from the `Authorization` header, falling back to
/// the `token` query parameter.
#[must_use]
pub fn extract_bearer(authorization: Option<&str>, query_token: Option<&str>) -> Option<String> {
    if let Some(value) = authorization {
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
        {
            return Some(token.trim().to_string());
        }
    }
    query_token.map(|t| t.trim().to_string())
}
