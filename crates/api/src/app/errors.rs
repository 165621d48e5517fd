use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tollgate_quota::AdmissionError;

use crate::context::RequestIdentity;
use tollgate_core::IdentityId;

pub fn admission_error_to_response(err: AdmissionError) -> axum::response::Response {
    match err {
        AdmissionError::NoSuchLicense(id) => {
            json_error(StatusCode::NOT_FOUND, "no_such_license", format!("no such license: {id}"))
        }
        AdmissionError::QuotaExhausted(id) => json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "quota_exhausted",
            format!("quota exhausted for license {id}"),
        ),
        AdmissionError::StoreUnavailable(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "quota ledger unavailable",
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// The caller's identity, or a 401 response for anonymous requests.
pub fn require_identity(identity: RequestIdentity) -> Result<IdentityId, axum::response::Response> {
    identity.identity().ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "valid session credentials required",
        )
    })
}
