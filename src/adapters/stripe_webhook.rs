use {
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{error::PipelineError, webhook::WebhookEvent},
        services::webhook::WebhookOutcome,
    },
    axum::{Json, extract::State, http::HeaderMap},
};

#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
pub async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sig = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PipelineError::WebhookSignature("missing Stripe-Signature header".into()))?;

    // Signature check only; the typed event is re-read from the raw body so
    // unknown object shapes still reach the router.
    stripe::Webhook::construct_event(&body, sig, &state.stripe_webhook_secret)
        .map_err(|e| PipelineError::WebhookSignature(e.to_string()))?;

    let raw_event: serde_json::Value = serde_json::from_str(&body).map_err(PipelineError::from)?;
    let event = match WebhookEvent::from_payload(raw_event) {
        Ok(event) => event,
        Err(PipelineError::Validation(msg)) => {
            tracing::warn!("skipping event with invalid envelope: {msg}");
            return Ok(Json(serde_json::json!({"status": WebhookOutcome::InvalidData.as_str()})));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::Span::current()
        .record("event_id", tracing::field::display(&event.id))
        .record("event_type", tracing::field::display(&event.event_type));

    let outcome = state.webhooks.process(&event).await;
    tracing::info!(status = outcome.as_str(), "webhook handled");
    Ok(Json(serde_json::json!({"status": outcome.as_str()})))
}
