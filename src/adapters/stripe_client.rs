use {
    crate::domain::{
        checkout::{CheckoutMode, CheckoutSession, LineItem, SessionPaymentStatus},
        error::PipelineError,
        id::{CheckoutSessionId, PriceId, SubscriptionId},
        provider::{BoxFuture, PaymentProvider},
        subscription::{BillingCycle, RecurringInterval, SubscriptionDetails, SubscriptionStatus},
    },
    chrono::{DateTime, Utc},
    reqwest::{RequestBuilder, StatusCode},
    serde::{Deserialize, de::DeserializeOwned},
    std::{collections::HashMap, time::Duration},
};

const CANCEL_AT_ATTEMPTS: u32 = 3;
const CANCEL_AT_BACKOFF: Duration = Duration::from_millis(500);

/// Stripe REST client for checkout sessions and subscriptions.
pub struct StripeProvider {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeProvider {
    pub fn new(secret_key: &str, base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.secret_key)
    }

    async fn fetch_session(&self, id: &CheckoutSessionId) -> Result<CheckoutSession, PipelineError> {
        let wire: WireSession = send(
            self.get(&format!("/v1/checkout/sessions/{id}"))
                .query(&[("expand[]", "line_items")]),
        )
        .await
        .map_err(Failure::into_inner)?;
        wire.try_into()
    }

    async fn list_sessions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CheckoutSession>, PipelineError> {
        let wire: WireList<WireSession> = send(self.get("/v1/checkout/sessions").query(&[
            ("created[gte]", since.timestamp().to_string()),
            ("status", "complete".to_string()),
            ("limit", limit.min(100).to_string()),
            ("expand[]", "data.line_items".to_string()),
        ]))
        .await
        .map_err(Failure::into_inner)?;

        let mut sessions = Vec::with_capacity(wire.data.len());
        for raw in wire.data {
            let id = raw.id.clone();
            match CheckoutSession::try_from(raw) {
                Ok(s) => sessions.push(s),
                Err(e) => tracing::warn!(session_id = %id, error = %e, "skipping unreadable checkout session"),
            }
        }
        Ok(sessions)
    }

    async fn fetch_subscription(&self, id: &SubscriptionId) -> Result<SubscriptionDetails, PipelineError> {
        let wire: WireSubscription = send(
            self.get(&format!("/v1/subscriptions/{id}"))
                .query(&[("expand[]", "items.data.price")]),
        )
        .await
        .map_err(Failure::into_inner)?;
        wire.try_into()
    }

    /// Retried with exponential backoff on transport errors and 5xx; a 4xx is final.
    async fn set_cancel_at(&self, id: &SubscriptionId, cancel_at: DateTime<Utc>) -> Result<(), PipelineError> {
        let form = [("cancel_at", cancel_at.timestamp().to_string())];
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result: Result<serde_json::Value, Failure> =
                send(self.post(&format!("/v1/subscriptions/{id}")).form(&form)).await;
            match result {
                Ok(_) => return Ok(()),
                Err(Failure::Final(e)) => return Err(e),
                Err(Failure::Retryable(e)) if attempt >= CANCEL_AT_ATTEMPTS => return Err(e),
                Err(Failure::Retryable(e)) => {
                    let delay = CANCEL_AT_BACKOFF * 2u32.pow(attempt - 1);
                    tracing::warn!(subscription_id = %id, attempt, error = %e, "cancel_at update failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl PaymentProvider for StripeProvider {
    fn get_checkout_session<'a>(&'a self, id: &'a CheckoutSessionId) -> BoxFuture<'a, CheckoutSession> {
        Box::pin(self.fetch_session(id))
    }

    fn list_completed_checkout_sessions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<CheckoutSession>> {
        Box::pin(self.list_sessions(since, limit))
    }

    fn get_subscription<'a>(&'a self, id: &'a SubscriptionId) -> BoxFuture<'a, SubscriptionDetails> {
        Box::pin(self.fetch_subscription(id))
    }

    fn update_subscription_cancel_at<'a>(
        &'a self,
        id: &'a SubscriptionId,
        cancel_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.set_cancel_at(id, cancel_at))
    }
}

enum Failure {
    Retryable(PipelineError),
    Final(PipelineError),
}

impl Failure {
    fn into_inner(self) -> PipelineError {
        match self {
            Self::Retryable(e) | Self::Final(e) => e,
        }
    }
}

async fn send<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, Failure> {
    let resp = req.send().await.map_err(|e| {
        if e.is_timeout() {
            Failure::Retryable(PipelineError::Timeout(format!("Stripe API: {e}")))
        } else {
            Failure::Retryable(PipelineError::Provider(format!("Stripe API: {e}")))
        }
    })?;

    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .map_err(|e| Failure::Final(PipelineError::Provider(format!("Stripe API decode: {e}"))));
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<WireErrorBody>(&body)
        .map(|b| b.error.message.unwrap_or_default())
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => Failure::Final(PipelineError::ProviderNotFound(message)),
        StatusCode::TOO_MANY_REQUESTS => {
            Failure::Retryable(PipelineError::Provider(format!("Stripe API {status}: {message}")))
        }
        s if s.is_client_error() => {
            Failure::Final(PipelineError::Provider(format!("Stripe API {status}: {message}")))
        }
        _ => Failure::Retryable(PipelineError::Provider(format!("Stripe API {status}: {message}"))),
    })
}

// ── Wire models ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireList<T> {
    data: Vec<T>,
}

/// A reference that Stripe returns either as an id or as an expanded object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireRef {
    Id(String),
    Object { id: String },
}

impl WireRef {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSession {
    id: String,
    mode: String,
    payment_status: String,
    customer: Option<WireRef>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    line_items: Option<WireList<WireLineItem>>,
    subscription: Option<WireRef>,
    created: i64,
}

#[derive(Debug, Deserialize)]
struct WireLineItem {
    price: Option<WirePrice>,
}

#[derive(Debug, Deserialize)]
struct WirePrice {
    id: String,
    recurring: Option<WireRecurring>,
}

#[derive(Debug, Deserialize)]
struct WireRecurring {
    interval: String,
    interval_count: u32,
}

#[derive(Debug, Deserialize)]
struct WireSubscription {
    id: String,
    status: String,
    current_period_end: Option<i64>,
    cancel_at: Option<i64>,
    items: WireList<WireSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct WireSubscriptionItem {
    price: Option<WirePrice>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: Option<String>,
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| PipelineError::Validation(format!("timestamp out of range: {ts}")))
}

impl TryFrom<WireSession> for CheckoutSession {
    type Error = PipelineError;

    fn try_from(w: WireSession) -> Result<Self, Self::Error> {
        let line_items = w
            .line_items
            .map(|l| l.data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|li| li.price)
            .map(|p| PriceId::new(p.id).map(|price_id| LineItem { price_id }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: CheckoutSessionId::new(w.id)?,
            mode: CheckoutMode::try_from(w.mode.as_str())?,
            payment_status: SessionPaymentStatus::try_from(w.payment_status.as_str())?,
            customer: w.customer.map(WireRef::into_id),
            metadata: w.metadata.unwrap_or_default(),
            line_items,
            subscription: w
                .subscription
                .map(|s| SubscriptionId::new(s.into_id()))
                .transpose()?,
            created_at: timestamp(w.created)?,
        })
    }
}

impl TryFrom<WireSubscription> for SubscriptionDetails {
    type Error = PipelineError;

    fn try_from(w: WireSubscription) -> Result<Self, Self::Error> {
        let first = w.items.data.into_iter().next();
        // Newer API versions report the period on the item instead of the subscription.
        let period_end = w
            .current_period_end
            .or_else(|| first.as_ref().and_then(|i| i.current_period_end))
            .ok_or_else(|| PipelineError::Validation(format!("subscription {} has no period end", w.id)))?;

        let billing_cycle = first
            .and_then(|i| i.price)
            .and_then(|p| p.recurring)
            .map(|r| {
                RecurringInterval::try_from(r.interval.as_str()).map(|interval| BillingCycle {
                    interval,
                    interval_count: r.interval_count.max(1),
                })
            })
            .transpose()?;

        Ok(Self {
            id: SubscriptionId::new(w.id)?,
            status: SubscriptionStatus::try_from(w.status.as_str())?,
            current_period_end: timestamp(period_end)?,
            cancel_at: w.cancel_at.map(timestamp).transpose()?,
            billing_cycle,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn session_from_wire() {
        let wire: WireSession = serde_json::from_value(json!({
            "id": "cs_test_1",
            "mode": "payment",
            "payment_status": "paid",
            "customer": {"id": "cus_1", "object": "customer"},
            "metadata": {"userID": "0190b8a4-5c1e-7000-8000-000000000001"},
            "line_items": {"object": "list", "data": [
                {"price": {"id": "price_credits", "recurring": null}},
                {"price": null}
            ]},
            "subscription": null,
            "created": 1704067200
        }))
        .unwrap();

        let s = CheckoutSession::try_from(wire).unwrap();
        assert_eq!(s.customer.as_deref(), Some("cus_1"));
        assert_eq!(s.line_items.len(), 1);
        assert_eq!(s.line_items[0].price_id.as_str(), "price_credits");
        assert!(s.is_paid());
        assert_eq!(s.created_at.timestamp(), 1704067200);
    }

    #[test]
    fn subscription_period_falls_back_to_item() {
        let wire: WireSubscription = serde_json::from_value(json!({
            "id": "sub_1",
            "status": "active",
            "cancel_at": null,
            "items": {"data": [{
                "current_period_end": 1706745600,
                "price": {"id": "price_m", "recurring": {"interval": "month", "interval_count": 1}}
            }]}
        }))
        .unwrap();

        let s = SubscriptionDetails::try_from(wire).unwrap();
        assert_eq!(s.current_period_end.timestamp(), 1706745600);
        assert_eq!(
            s.billing_cycle,
            Some(BillingCycle {
                interval: RecurringInterval::Month,
                interval_count: 1
            })
        );
    }
}
