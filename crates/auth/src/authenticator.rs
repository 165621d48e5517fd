//! Request authentication from an access/refresh credential pair.
//!
//! Resolution order:
//! 1. A valid access token resolves the identity directly (no store access).
//! 2. Otherwise a refresh token is classified against the credential store and,
//!    if active, rotated: `Active -> Rotated`. A consumed value is a replay:
//!    `Consumed -> Reused`, which revokes the session it was issued to. Every
//!    replay of it does so again until the value's own refresh expiry.
//! 3. Anything else resolves as anonymous.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tollgate_core::{Clock, IdentityId, SessionId};

use crate::claims::AccessClaims;
use crate::credential::{CredentialPair, CredentialRecord};
use crate::refresh::RefreshToken;
use crate::revocation::RevokedSessions;
use crate::store::{CredentialStore, CredentialStoreError, RefreshLookup, RotateOutcome};
use crate::token::{AccessTokenCodec, TokenError};

/// Cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Raw credential values as extracted from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentedCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl PresentedCredentials {
    pub fn new(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.filter(|t| !t.is_empty()),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
        }
    }

    /// Extract credentials from a `Cookie` request header value.
    ///
    /// Unrelated cookies are ignored; if a name repeats, the first value wins.
    pub fn from_cookie_header(header: &str) -> Self {
        let mut access = None;
        let mut refresh = None;
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match name.trim() {
                ACCESS_TOKEN_COOKIE if access.is_none() => access = Some(value.to_string()),
                REFRESH_TOKEN_COOKIE if refresh.is_none() => refresh = Some(value.to_string()),
                _ => {}
            }
        }
        Self::new(access, refresh)
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatorConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
        }
    }
}

/// Why a request resolved to no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonymousReason {
    NoCredentials,
    /// Access token failed verification and no usable refresh token was presented.
    InvalidCredential,
}

/// Outcome of authenticating one request.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Access token verified; nothing to send back.
    Verified {
        identity: IdentityId,
        session_id: SessionId,
    },
    /// Refresh token rotated; `pair` must replace the client's credentials.
    Rotated {
        identity: IdentityId,
        pair: CredentialPair,
    },
    Anonymous(AnonymousReason),
}

impl Resolution {
    pub fn identity(&self) -> Option<IdentityId> {
        match self {
            Resolution::Verified { identity, .. } | Resolution::Rotated { identity, .. } => {
                Some(*identity)
            }
            Resolution::Anonymous(_) => None,
        }
    }
}

/// Result of presenting a refresh token, as an explicit state transition.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// `Active -> Rotated`: the new record is committed.
    Rotated {
        record: CredentialRecord,
        pair: CredentialPair,
    },
    /// `Consumed -> Reused`: the session has been revoked.
    Reused { identity: IdentityId },
    /// Another request rotated the same value first.
    Stale { identity: IdentityId },
    Expired { identity: IdentityId },
    Unknown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("refresh token reuse detected for identity {identity}")]
    RefreshTokenReuseDetected { identity: IdentityId },

    #[error("refresh token was already rotated by a concurrent request")]
    StaleRefreshToken,

    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<CredentialStoreError> for AuthError {
    fn from(value: CredentialStoreError) -> Self {
        AuthError::StoreUnavailable(value.to_string())
    }
}

pub struct TokenAuthenticator {
    store: Arc<dyn CredentialStore>,
    codec: Arc<dyn AccessTokenCodec>,
    clock: Arc<dyn Clock>,
    config: AuthenticatorConfig,
    revoked: RevokedSessions,
}

impl core::fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("config", &self.config)
            .field("revoked_sessions", &self.revoked.len())
            .finish_non_exhaustive()
    }
}

impl TokenAuthenticator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: Arc<dyn AccessTokenCodec>,
        clock: Arc<dyn Clock>,
        config: AuthenticatorConfig,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            config,
            revoked: RevokedSessions::new(),
        }
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    /// Start a new session for an identity that has proven who it is.
    ///
    /// Any previous session of the identity is replaced and revoked.
    pub async fn login(&self, identity: IdentityId) -> Result<CredentialPair, AuthError> {
        let now = self.clock.now();
        let refresh = RefreshToken::generate();
        let record = CredentialRecord::issue(
            identity,
            SessionId::new(),
            refresh.digest(),
            now,
            self.config.refresh_ttl,
        );
        let pair = self.pair_for(&record, refresh, now)?;

        if let Some(previous) = self.store.get(identity).await? {
            self.revoke_session(previous.session_id, now);
        }
        self.store.put(record).await?;

        info!(identity = %identity, session = %pair.session_id, "session started");
        Ok(pair)
    }

    /// End the identity's session. Returns whether a session existed.
    pub async fn logout(&self, identity: IdentityId) -> Result<bool, AuthError> {
        let Some(current) = self.store.get(identity).await? else {
            return Ok(false);
        };
        match self.store.invalidate(identity, current.session_id).await? {
            Some(record) => {
                self.revoke_session(record.session_id, self.clock.now());
                info!(identity = %identity, session = %record.session_id, "session ended");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve the identity behind a request's credentials.
    pub async fn authenticate(
        &self,
        presented: &PresentedCredentials,
    ) -> Result<Resolution, AuthError> {
        if presented.is_empty() {
            return Ok(Resolution::Anonymous(AnonymousReason::NoCredentials));
        }

        if let Some(access) = &presented.access_token {
            let now = self.clock.now();
            match self.codec.verify(access, now) {
                Ok(claims) if self.revoked.is_revoked(claims.sid, now) => {
                    debug!(identity = %claims.sub, session = %claims.sid, "access token belongs to revoked session");
                }
                Ok(claims) => {
                    return Ok(Resolution::Verified {
                        identity: claims.sub,
                        session_id: claims.sid,
                    });
                }
                Err(e) => {
                    debug!(error = %e, "access token rejected");
                }
            }
        }

        let Some(refresh) = &presented.refresh_token else {
            return Ok(Resolution::Anonymous(AnonymousReason::InvalidCredential));
        };

        match self.refresh(&RefreshToken::from_presented(refresh.clone())).await {
            Ok(RefreshOutcome::Rotated { record, pair }) => Ok(Resolution::Rotated {
                identity: record.identity,
                pair,
            }),
            Ok(RefreshOutcome::Reused { identity }) => {
                Err(AuthError::RefreshTokenReuseDetected { identity })
            }
            Ok(RefreshOutcome::Stale { .. }) => Err(AuthError::StaleRefreshToken),
            Ok(RefreshOutcome::Expired { .. } | RefreshOutcome::Unknown) => {
                Ok(Resolution::Anonymous(AnonymousReason::InvalidCredential))
            }
            Err(e) => Err(e),
        }
    }

    /// Present a refresh token to the store and apply the resulting transition.
    pub async fn refresh(&self, token: &RefreshToken) -> Result<RefreshOutcome, AuthError> {
        let hash = token.digest();
        let lookup = self.store.lookup_refresh(&hash).await.inspect_err(|e| {
            error!(error = %e, "credential store unavailable during refresh lookup");
        })?;
        let now = self.clock.now();

        match lookup {
            RefreshLookup::Unknown => Ok(RefreshOutcome::Unknown),

            RefreshLookup::Consumed(consumed) => {
                let identity = consumed.identity;
                if consumed.is_expired(now) {
                    debug!(identity = %identity, "consumed refresh token past its expiry");
                    return Ok(RefreshOutcome::Expired { identity });
                }

                warn!(
                    identity = %identity,
                    session = %consumed.session_id,
                    refresh = %hash,
                    "consumed refresh token replayed; revoking session (possible credential theft)"
                );
                // Only the session the value was issued to; a newer login survives.
                self.store.invalidate(identity, consumed.session_id).await?;
                self.revoke_session(consumed.session_id, now);
                Ok(RefreshOutcome::Reused { identity })
            }

            RefreshLookup::Active(current) => {
                let identity = current.identity;
                if current.is_refresh_expired(now) {
                    debug!(identity = %identity, "refresh token expired");
                    return Ok(RefreshOutcome::Expired { identity });
                }

                let next_refresh = RefreshToken::generate();
                let next = current.rotated(next_refresh.digest(), now, self.config.refresh_ttl);
                let pair = self.pair_for(&next, next_refresh, now)?;

                match self.store.rotate(identity, &hash, next.clone()).await? {
                    RotateOutcome::Committed => {
                        debug!(identity = %identity, generation = next.generation, "refresh token rotated");
                        Ok(RefreshOutcome::Rotated { record: next, pair })
                    }
                    RotateOutcome::Conflict => {
                        debug!(identity = %identity, "lost refresh rotation race");
                        Ok(RefreshOutcome::Stale { identity })
                    }
                }
            }
        }
    }

    fn pair_for(
        &self,
        record: &CredentialRecord,
        refresh_token: RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<CredentialPair, AuthError> {
        let access_expires_at = now + self.config.access_ttl;
        let claims = AccessClaims::new(record.identity, record.session_id, now, access_expires_at);
        let access_token = self.codec.issue(&claims)?;

        Ok(CredentialPair {
            identity: record.identity,
            session_id: record.session_id,
            access_token,
            access_expires_at,
            refresh_token,
            refresh_expires_at: record.refresh_expires_at,
        })
    }

    fn revoke_session(&self, session: SessionId, now: DateTime<Utc>) {
        // Covers every access token minted for the session up to now.
        self.revoked.revoke(session, now + self.config.access_ttl, now);
    }
}
