use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{error::PipelineError, id::CheckoutSessionId},
        services::verify::VerificationResult,
    },
    axum::{
        Json,
        extract::{FromRequestParts, Path, State},
        http::request::Parts,
    },
    uuid::Uuid,
};

/// Header set by the upstream auth layer once the customer is authenticated.
pub const CUSTOMER_ID_HEADER: &str = "x-customer-id";

/// Authenticated customer making the request.
pub struct CustomerIdentity(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for CustomerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(CUSTOMER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(PipelineError::Unauthenticated)?;
        Ok(Self(id))
    }
}

#[tracing::instrument(name = "checkout_verify", skip_all, fields(session_id = %session_id))]
pub async fn verify_checkout_handler(
    State(state): State<AppState>,
    CustomerIdentity(customer_id): CustomerIdentity,
    Path(session_id): Path<String>,
) -> Result<Json<VerificationResult>, ApiError> {
    let session_id = CheckoutSessionId::new(session_id)?;
    let result = state.verifier.verify(&session_id, customer_id).await?;
    Ok(Json(result))
}
