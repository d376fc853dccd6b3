use {serde::Serialize, uuid::Uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    ReconciliationFailure,
    ReconciliationSuccess,
    ReconciliationPartial,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReconciliationFailure => "RECONCILIATION_FAILURE",
            Self::ReconciliationSuccess => "RECONCILIATION_SUCCESS",
            Self::ReconciliationPartial => "RECONCILIATION_PARTIAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationAlert {
    pub session_id: String,
    pub customer_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub error_message: String,
    pub was_fixed: bool,
    pub product: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookFailureAlert {
    pub event_id: String,
    pub event_type: String,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    Reconciliation(ReconciliationAlert),
    WebhookPermanentFailure(WebhookFailureAlert),
}

/// Operator notification channel. Delivery is best-effort and must not block
/// or fail the caller.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: Alert);
}
