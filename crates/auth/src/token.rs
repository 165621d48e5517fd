//! Access-token encoding and verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use thiserror::Error;

use crate::claims::{AccessClaims, TokenValidationError, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to encode token: {0}")]
    Encoding(String),
}

/// Mints and verifies stateless access tokens.
///
/// `verify` must check both signature and time window; a token it accepts is
/// trusted without a store lookup.
pub trait AccessTokenCodec: Send + Sync + 'static {
    fn issue(&self, claims: &AccessClaims) -> Result<String, TokenError>;

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError>;
}

/// HMAC-SHA256 signed JWT access tokens.
pub struct Hs256AccessTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl Hs256AccessTokens {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        // Expiry is checked against the injected clock in `validate_claims`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256AccessTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256AccessTokens").finish_non_exhaustive()
    }
}

impl AccessTokenCodec for Hs256AccessTokens {
    fn issue(&self, claims: &AccessClaims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Claims(TokenValidationError::Expired),
                _ => TokenError::Malformed(e.to_string()),
            })?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tollgate_core::{IdentityId, SessionId};

    fn claims(now: DateTime<Utc>) -> AccessClaims {
        AccessClaims::new(IdentityId::new(), SessionId::new(), now, now + Duration::minutes(15))
    }

    #[test]
    fn issued_token_verifies() {
        let codec = Hs256AccessTokens::new("test-secret");
        let now = Utc::now();
        let c = claims(now);

        let token = codec.issue(&c).unwrap();
        assert_eq!(codec.verify(&token, now).unwrap(), c);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let now = Utc::now();
        let token = Hs256AccessTokens::new("secret-a").issue(&claims(now)).unwrap();

        let err = Hs256AccessTokens::new("secret-b").verify(&token, now).unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[test]
    fn expiry_follows_supplied_time() {
        let codec = Hs256AccessTokens::new("test-secret");
        let now = Utc::now();
        let token = codec.issue(&claims(now)).unwrap();

        let err = codec.verify(&token, now + Duration::minutes(16)).unwrap_err();
        assert_eq!(err, TokenError::Claims(TokenValidationError::Expired));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = Hs256AccessTokens::new("test-secret");
        let err = codec.verify("not.a.jwt", Utc::now()).unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }
}
