use std::sync::Arc;

use axum::{Extension, http::StatusCode, response::IntoResponse};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestIdentity;
use crate::cookies;

/// End the caller's session and clear its cookies.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<RequestIdentity>,
) -> axum::response::Response {
    let identity = match errors::require_identity(identity) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Err(e) = services.authenticator.logout(identity).await {
        tracing::error!(identity = %identity, error = %e, "logout failed");
        return errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "credential store unavailable",
        );
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    cookies::append(response.headers_mut(), cookies::clear(services.cookie_secure));
    response
}
