//! # Custom Extractors & Validation
//!
//! - [`OrgScope`]: the organization a request operates on, taken from the
//!   `X-Org-Id` header set by the tenant-context layer in front of this
//!   service.
//! - [`Validate`]: business-rule checks on query DTOs beyond what serde does.

use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;

use keystone_core::OrgId;

use crate::error::AppError;

/// Header carrying the already-validated organization id.
pub const ORG_HEADER: &str = "x-org-id";

/// Organization scope of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgScope(pub OrgId);

impl<S> FromRequestParts<S> for OrgScope
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORG_HEADER)
            .ok_or_else(|| AppError::BadRequest("missing X-Org-Id header".into()))?
            .to_str()
            .map_err(|_| AppError::BadRequest("X-Org-Id is not valid ASCII".into()))?;
        Ok(Self(OrgId::new(raw)?))
    }
}

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Extract query parameters and validate them.
pub fn extract_validated_query<T: Validate>(
    result: Result<Query<T>, QueryRejection>,
) -> Result<T, AppError> {
    let Query(value) = result.map_err(|err| AppError::BadRequest(err.body_text()))?;
    value.validate().map_err(AppError::BadRequest)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn scope_of(req: Request<()>) -> Result<OrgScope, AppError> {
        let (mut parts, _) = req.into_parts();
        OrgScope::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_org_header() {
        let req = Request::builder().header("X-Org-Id", "org-7").body(()).unwrap();
        assert_eq!(scope_of(req).await.unwrap().0.as_str(), "org-7");
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_bad_request() {
        let req = Request::builder().body(()).unwrap();
        assert!(matches!(scope_of(req).await, Err(AppError::BadRequest(_))));

        let req = Request::builder().header("X-Org-Id", "  ").body(()).unwrap();
        assert!(matches!(scope_of(req).await, Err(AppError::BadRequest(_))));
    }
}
