use std::sync::Arc;

use axum::{
    extract::State,
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use tollgate_auth::{AnonymousReason, AuthError, Resolution, TokenAuthenticator};
use tollgate_core::Clock;

use crate::app::errors;
use crate::context::RequestIdentity;
use crate::cookies;

#[derive(Clone)]
pub struct SessionState {
    pub authenticator: Arc<TokenAuthenticator>,
    /// Same clock the authenticator issues with; cookie lifetimes derive from it.
    pub clock: Arc<dyn Clock>,
    pub cookie_secure: bool,
}

/// Resolve the request's identity from its credential cookies.
///
/// Inserts a [`RequestIdentity`] into the request extensions. Rotated
/// credentials are sent back as `Set-Cookie` unless the handler set its own
/// cookies. A replayed refresh token ends the request with 401.
pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let presented = cookies::presented(req.headers());

    let mut set_cookies = Vec::new();
    let identity = match state.authenticator.authenticate(&presented).await {
        Ok(Resolution::Verified { identity, .. }) => RequestIdentity::Authenticated(identity),
        Ok(Resolution::Rotated { identity, pair }) => {
            set_cookies = cookies::issue(&pair, state.clock.now(), state.cookie_secure);
            RequestIdentity::Authenticated(identity)
        }
        Ok(Resolution::Anonymous(AnonymousReason::NoCredentials)) => RequestIdentity::Anonymous,
        Ok(Resolution::Anonymous(AnonymousReason::InvalidCredential)) => {
            set_cookies = cookies::clear(state.cookie_secure);
            RequestIdentity::Anonymous
        }
        Err(AuthError::RefreshTokenReuseDetected { identity }) => {
            warn!(identity = %identity, "rejecting request that replayed a refresh token");
            let mut response = errors::json_error(
                StatusCode::UNAUTHORIZED,
                "refresh_token_reused",
                "session revoked; sign in again",
            );
            cookies::append(response.headers_mut(), cookies::clear(state.cookie_secure));
            return response;
        }
        Err(AuthError::StaleRefreshToken) => {
            debug!("refresh token already rotated by a concurrent request; continuing anonymously");
            RequestIdentity::Anonymous
        }
        Err(e @ (AuthError::StoreUnavailable(_) | AuthError::Token(_))) => {
            error!(error = %e, "authentication failed; continuing anonymously");
            RequestIdentity::Anonymous
        }
    };

    req.extensions_mut().insert(identity);
    let mut response = next.run(req).await;

    if !set_cookies.is_empty() && !response.headers().contains_key(header::SET_COOKIE) {
        cookies::append(response.headers_mut(), set_cookies);
    }
    response
}
