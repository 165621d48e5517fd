use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};

use tollgate_core::LicenseId;
use tollgate_quota::AdmissionError;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestIdentity;

pub fn router() -> Router {
    Router::new()
        .route("/:license_id/quota", get(get_quota))
        .route("/:license_id/admit", post(admit))
}

/// Current bucket of a license owned by the caller.
pub async fn get_quota(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<RequestIdentity>,
    Path(license_id): Path<String>,
) -> axum::response::Response {
    let identity = match errors::require_identity(identity) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let license_id = match parse_license_id(license_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let license = match services.ledger.license(&license_id).await {
        Ok(Some(license)) if license.owner == identity => license,
        Ok(_) => return errors::admission_error_to_response(AdmissionError::NoSuchLicense(license_id)),
        Err(e) => {
            tracing::error!(license = %license_id, error = %e, "failed to load license");
            return errors::admission_error_to_response(AdmissionError::StoreUnavailable(e.to_string()));
        }
    };

    match services.ledger.bucket(&license_id).await {
        Ok(Some(bucket)) => Json(serde_json::json!({
            "license_id": bucket.license_id(),
            "capacity": bucket.capacity(),
            "remaining": bucket.remaining(),
            "last_replenished_at": bucket.last_replenished_at(),
            "replenish_interval_secs": license.replenish_interval_secs,
        }))
        .into_response(),
        Ok(None) => errors::admission_error_to_response(AdmissionError::NoSuchLicense(license_id)),
        Err(e) => {
            tracing::error!(license = %license_id, error = %e, "failed to load quota bucket");
            errors::admission_error_to_response(AdmissionError::StoreUnavailable(e.to_string()))
        }
    }
}

/// A license-gated operation: consumes one unit of the caller's quota.
pub async fn admit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<RequestIdentity>,
    Path(license_id): Path<String>,
) -> axum::response::Response {
    let identity = match errors::require_identity(identity) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let license_id = match parse_license_id(license_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let admitted = match services.admission.try_admit_as(identity, &license_id).await {
        Ok(a) => a,
        Err(e) => return errors::admission_error_to_response(e),
    };

    let mut response = (
        StatusCode::OK,
        Json(serde_json::json!({
            "license_id": admitted.license_id,
            "remaining": admitted.remaining,
            "capacity": admitted.capacity,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-remaining", HeaderValue::from(admitted.remaining));
    headers.insert("x-ratelimit-limit", HeaderValue::from(admitted.capacity));
    response
}

fn parse_license_id(raw: String) -> Result<LicenseId, axum::response::Response> {
    LicenseId::parse(raw)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_license_id", e.to_string()))
}
