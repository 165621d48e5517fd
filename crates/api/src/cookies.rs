//! Credential cookies on responses.
//!
//! Extraction lives in `tollgate_auth::PresentedCredentials::from_cookie_header`;
//! this module only builds `Set-Cookie` values.

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, Utc};

use tollgate_auth::{ACCESS_TOKEN_COOKIE, CredentialPair, PresentedCredentials, REFRESH_TOKEN_COOKIE};

/// Credentials from every `Cookie` header of a request.
pub fn presented(headers: &HeaderMap) -> PresentedCredentials {
    let joined = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    PresentedCredentials::from_cookie_header(&joined)
}

/// `Set-Cookie` values that hand `pair` to the client.
pub fn issue(pair: &CredentialPair, now: DateTime<Utc>, secure: bool) -> Vec<HeaderValue> {
    [
        build(
            ACCESS_TOKEN_COOKIE,
            &pair.access_token,
            seconds_until(pair.access_expires_at, now),
            secure,
        ),
        build(
            REFRESH_TOKEN_COOKIE,
            pair.refresh_token.as_str(),
            seconds_until(pair.refresh_expires_at, now),
            secure,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// `Set-Cookie` values that remove both credential cookies.
pub fn clear(secure: bool) -> Vec<HeaderValue> {
    [
        build(ACCESS_TOKEN_COOKIE, "", 0, secure),
        build(REFRESH_TOKEN_COOKIE, "", 0, secure),
    ]
    .into_iter()
    .flatten()
    .collect()
}

pub fn append(headers: &mut HeaderMap, cookies: Vec<HeaderValue>) {
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
}

fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (at - now).num_seconds().max(0)
}

fn build(name: &str, value: &str, max_age: i64, secure: bool) -> Option<HeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    let raw = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}");
    match HeaderValue::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(cookie = name, error = %e, "credential cookie is not a valid header value");
            None
        }
    }
}
