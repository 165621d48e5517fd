use axum::{Extension, Json, response::IntoResponse};

use crate::context::RequestIdentity;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn whoami(Extension(identity): Extension<RequestIdentity>) -> impl IntoResponse {
    match identity {
        RequestIdentity::Authenticated(id) => Json(serde_json::json!({
            "authenticated": true,
            "identity_id": id.to_string(),
        })),
        RequestIdentity::Anonymous => Json(serde_json::json!({ "authenticated": false })),
    }
}
