//! `tollgate-auth`: session resolution from a rotating access/refresh pair.
//!
//! This crate is decoupled from HTTP: callers hand in the raw credential
//! values and receive a [`Resolution`] describing who the request is and
//! whether replacement credentials must be sent back.

pub mod authenticator;
pub mod claims;
pub mod credential;
pub mod refresh;
pub mod revocation;
pub mod store;
pub mod token;

pub use authenticator::{
    ACCESS_TOKEN_COOKIE, AnonymousReason, AuthError, AuthenticatorConfig, PresentedCredentials,
    REFRESH_TOKEN_COOKIE, RefreshOutcome, Resolution, TokenAuthenticator,
};
pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use credential::{ConsumedRefresh, CredentialPair, CredentialRecord};
pub use refresh::{RefreshToken, RefreshTokenHash};
pub use revocation::RevokedSessions;
pub use store::{
    CredentialStore, CredentialStoreError, InMemoryCredentialStore, RefreshLookup, RotateOutcome,
};
pub use token::{AccessTokenCodec, Hs256AccessTokens, TokenError};
