//! Clinic context extractor for multi-tenancy support.
//!
//! Extracts the clinic and acting user from request headers. These headers
//! are set by the frontend gateway after authenticating the user and
//! validating their clinic membership, so both are required on every
//! invoicing route.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const CLINIC_ID_HEADER: &str = "X-Clinic-ID";
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Clinic context extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct ClinicContext {
    /// Clinic (tenant) every queried row must belong to.
    pub clinic_id: Uuid,
    /// User performing the request; recorded in the audit trail.
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for ClinicContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let clinic_id = required_uuid_header(parts, CLINIC_ID_HEADER)?;
        let user_id = required_uuid_header(parts, USER_ID_HEADER)?;

        // Add to tracing span for observability
        let span = tracing::Span::current();
        span.record("clinic_id", clinic_id.to_string().as_str());
        span.record("user_id", user_id.to_string().as_str());

        Ok(ClinicContext { clinic_id, user_id })
    }
}

fn required_uuid_header(parts: &Parts, name: &str) -> Result<Uuid, AppError> {
    let raw = parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!(
                "Missing {} header (required from gateway)",
                name
            ))
        })?;

    raw.parse::<Uuid>()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {} header: not a UUID", name)))
}
