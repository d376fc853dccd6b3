use {
    crate::domain::{
        alert::{Alert, AlertSink, AlertType},
        error::PipelineError,
    },
    chrono::Utc,
    serde::Serialize,
    std::time::Duration,
};

const SLACK_CHANNEL: &str = "#payment-alerts";
const SLACK_USERNAME: &str = "Payment-Bot";
const SLACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
    channel: &'static str,
    username: &'static str,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: &'static str,
    title: String,
    text: String,
    ts: i64,
    fields: Vec<SlackField>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: &'static str,
    value: String,
    short: bool,
}

fn field(title: &'static str, value: impl ToString) -> SlackField {
    SlackField {
        title,
        value: value.to_string(),
        short: true,
    }
}

fn payload(alert: &Alert) -> SlackPayload {
    let (color, title, text, fields) = match alert {
        Alert::Reconciliation(a) => {
            let color = match a.alert_type {
                AlertType::ReconciliationFailure => "danger",
                AlertType::ReconciliationPartial => "warning",
                AlertType::ReconciliationSuccess => "good",
            };
            let mut fields = vec![
                field("Product", &a.product),
                field("Was Fixed", a.was_fixed),
            ];
            if !a.session_id.is_empty() {
                fields.push(field("Session", &a.session_id));
            }
            if let Some(customer) = a.customer_id {
                fields.push(field("Customer", customer));
            }
            (
                color,
                format!("[{}] Checkout reconciliation", a.alert_type.as_str()),
                a.error_message.clone(),
                fields,
            )
        }
        Alert::WebhookPermanentFailure(a) => (
            "danger",
            "[CRITICAL] Webhook permanently failed".to_string(),
            a.last_error.clone(),
            vec![
                field("Event", &a.event_id),
                field("Type", &a.event_type),
                field("Attempts", a.attempts),
            ],
        ),
    };

    SlackPayload {
        text: title.clone(),
        channel: SLACK_CHANNEL,
        username: SLACK_USERNAME,
        attachments: vec![SlackAttachment {
            color,
            title,
            text,
            ts: Utc::now().timestamp(),
            fields,
        }],
    }
}

fn log_alert(alert: &Alert) {
    match alert {
        Alert::Reconciliation(a) if a.alert_type == AlertType::ReconciliationSuccess => {
            tracing::info!(alert_type = a.alert_type.as_str(), product = %a.product, message = %a.error_message, "operator alert");
        }
        Alert::Reconciliation(a) => {
            tracing::error!(alert_type = a.alert_type.as_str(), product = %a.product, session_id = %a.session_id, message = %a.error_message, "operator alert");
        }
        Alert::WebhookPermanentFailure(a) => {
            tracing::error!(event_id = %a.event_id, event_type = %a.event_type, attempts = a.attempts, error = %a.last_error, "operator alert");
        }
    }
}

/// Posts alerts to a Slack incoming webhook in the background.
pub struct SlackAlertSink {
    http: reqwest::Client,
    url: String,
}

impl SlackAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(SLACK_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Config(format!("slack client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

impl AlertSink for SlackAlertSink {
    fn send(&self, alert: Alert) {
        log_alert(&alert);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime to deliver slack alert");
            return;
        };
        let request = self.http.post(&self.url).json(&payload(&alert));
        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => tracing::warn!(status = %resp.status(), "slack alert rejected"),
                Err(e) => tracing::warn!(error = %e, "slack alert delivery failed"),
            }
        });
    }
}

/// Fallback when no Slack webhook is configured.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send(&self, alert: Alert) {
        log_alert(&alert);
    }
}
