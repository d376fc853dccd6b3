use {
    crate::{AppState, adapters::api_errors::ApiError, domain::error::PipelineError},
    axum::{
        Json,
        extract::{FromRequestParts, State},
        http::{StatusCode, request::Parts},
        response::{IntoResponse, Response},
    },
    tokio::sync::watch,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Admin routes are closed unless `ADMIN_TOKEN` is configured.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state.admin_token.as_deref().ok_or(PipelineError::AccessDenied)?;
        let given = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(PipelineError::Unauthenticated)?;
        if given != expected {
            return Err(PipelineError::AccessDenied.into());
        }
        Ok(Self)
    }
}

/// Runs one checkout sweep inline and returns its report.
#[tracing::instrument(name = "admin_sweep", skip_all)]
pub async fn run_sweep_handler(_: AdminAuth, State(state): State<AppState>) -> Result<Response, ApiError> {
    let (_keep_open, rx) = watch::channel(false);
    match state.sweep.run_once(&rx).await? {
        Some(report) => Ok(Json(report).into_response()),
        None => Ok((
            StatusCode::CONFLICT,
            Json(serde_json::json!({"status": "already_running"})),
        )
            .into_response()),
    }
}

/// Runs one membership drift sweep inline and returns its report.
#[tracing::instrument(name = "admin_membership_sweep", skip_all)]
pub async fn run_membership_sweep_handler(
    _: AdminAuth,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let (_keep_open, rx) = watch::channel(false);
    match state.memberships.run_once(&rx).await? {
        Some(report) => Ok(Json(report).into_response()),
        None => Ok((
            StatusCode::CONFLICT,
            Json(serde_json::json!({"status": "already_running"})),
        )
            .into_response()),
    }
}

pub async fn webhook_stats_handler(_: AdminAuth, State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ledger": state.ledger.stats(),
        "retries": state.retries.stats(),
    }))
}
