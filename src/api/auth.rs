// AuthContext extraction - identity headers set by the upstream gateway

//! # Auth Extraction
//!
//! Credential validation happens upstream; by the time a request reaches
//! Conductor the gateway has stamped identity headers. The extractor turns
//! them into an [`AuthContext`], rejecting requests without identity with
//! `401` and the standard error envelope.
//!
//! Headers: `x-user-id`, `x-organization-id` (both required), `x-roles`
//! (comma-separated, optional), `x-idempotency-key` (optional).

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::models::AuthContext;

use super::types::ApiError;

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let user_id = header_str(headers, "x-user-id")
            .ok_or_else(|| ApiError::unauthorized("missing x-user-id header"))?;
        let organization_id = header_str(headers, "x-organization-id")
            .ok_or_else(|| ApiError::unauthorized("missing x-organization-id header"))?;

        let roles = header_str(headers, "x-roles")
            .map(|raw| {
                raw.split(',')
                    .map(|role| role.trim().to_string())
                    .filter(|role| !role.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut auth = AuthContext::new(user_id, organization_id).with_roles(roles);
        if let Some(key) = header_str(headers, "x-idempotency-key") {
            auth = auth.with_idempotency_key(key);
        }
        Ok(auth)
    }
}
