use {
    super::{error::PipelineError, id::EventId},
    serde::{Deserialize, Serialize},
};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// A verified provider event. `payload` is the full raw event body, kept so a
/// retry or dead letter can replay exactly what was delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,
    pub event_type: String,
    pub created: i64,
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn from_payload(payload: serde_json::Value) -> Result<Self, PipelineError> {
        let id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::Validation("event has no id".into()))?;
        let event_type = payload
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let created = payload.get("created").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(Self {
            id: EventId::new(id)?,
            event_type,
            created,
            payload,
        })
    }

    /// `data.object` of the event.
    pub fn object(&self) -> &serde_json::Value {
        &self.payload["data"]["object"]
    }

    /// String field of `data.object`, or of an expanded object under it.
    pub fn object_str(&self, field: &str) -> Option<&str> {
        let v = &self.object()[field];
        v.as_str().or_else(|| v["id"].as_str())
    }
}

/// Permanently failed event, persisted for manual replay.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub attempts: u32,
}
