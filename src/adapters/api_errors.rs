use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so the domain error can implement axum's `IntoResponse`.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Validation(_) | PipelineError::WebhookSignature(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::UnknownProduct(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::AccessDenied => StatusCode::FORBIDDEN,
            PipelineError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PipelineError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Database(_)
            | PipelineError::Serialization(_)
            | PipelineError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match &self.0 {
            PipelineError::Validation(msg) => ("validation_error", msg.clone()),
            PipelineError::UnknownProduct(msg) => ("unknown_product", msg.clone()),
            PipelineError::WebhookSignature(_) => {
                ("webhook_error", "invalid webhook signature".to_string())
            }
            PipelineError::AccessDenied => ("access_denied", "Access denied".to_string()),
            PipelineError::Unauthenticated => {
                ("unauthenticated", "authentication required".to_string())
            }
            PipelineError::ProviderNotFound(_) => {
                ("not_found", "checkout session not found".to_string())
            }
            PipelineError::Provider(err) | PipelineError::Timeout(err) => {
                tracing::error!("payment provider error: {err}");
                ("provider_error", "payment provider unavailable".to_string())
            }
            PipelineError::Database(err) => {
                tracing::error!("database error: {err}");
                ("internal_error", "internal error".to_string())
            }
            PipelineError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                ("internal_error", "internal error".to_string())
            }
            PipelineError::Config(err) => {
                tracing::error!("config error: {err}");
                ("internal_error", "internal error".to_string())
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
