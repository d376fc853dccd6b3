use {
    super::{
        applier::{CheckoutApplier, Reconciliation},
        ledger::IdempotencyLedger,
        retry::{RetryDecision, RetryScheduler, WebhookDispatcher},
    },
    crate::domain::{
        error::PipelineError,
        id::{CheckoutSessionId, SubscriptionId},
        provider::BoxFuture,
        subscription::{MembershipStatus, SubscriptionStatus},
        webhook::{
            CHECKOUT_SESSION_COMPLETED, INVOICE_PAYMENT_FAILED, INVOICE_PAYMENT_SUCCEEDED,
            SUBSCRIPTION_DELETED, SUBSCRIPTION_UPDATED, WebhookEvent,
        },
    },
    std::sync::Arc,
};

/// What the webhook endpoint reports back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
    InvalidData,
    RetryScheduled,
    PermanentlyFailed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::InvalidData => "ignored_invalid_data",
            Self::RetryScheduled => "retry_scheduled",
            Self::PermanentlyFailed => "failed_permanently",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Processed,
    Ignored,
}

/// Event-type router. The idempotency ledger is consulted before and written
/// after every handler run, including retries.
pub struct WebhookProcessor {
    ledger: Arc<IdempotencyLedger>,
    retries: Arc<RetryScheduler>,
    applier: Arc<CheckoutApplier>,
}

impl WebhookProcessor {
    pub fn new(
        ledger: Arc<IdempotencyLedger>,
        retries: Arc<RetryScheduler>,
        applier: Arc<CheckoutApplier>,
    ) -> Self {
        Self {
            ledger,
            retries,
            applier,
        }
    }

    /// First delivery path. Failures go to the retry scheduler instead of
    /// back to the caller.
    #[tracing::instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: &WebhookEvent) -> WebhookOutcome {
        if self.ledger.is_processed(&event.id).await {
            tracing::info!("duplicate event, already processed");
            return WebhookOutcome::Duplicate;
        }

        let outcome = self.run(event).await;
        let handled = match &outcome {
            Ok(h) => Some(*h),
            Err(_) => None,
        };

        match self.retries.record_outcome(event, &outcome.map(|_| ())).await {
            None => match handled {
                Some(Handled::Processed) => WebhookOutcome::Processed,
                Some(Handled::Ignored) => WebhookOutcome::Ignored,
                None => WebhookOutcome::InvalidData,
            },
            Some(RetryDecision::Scheduled { .. }) => WebhookOutcome::RetryScheduled,
            Some(RetryDecision::PermanentlyFailed { .. }) => WebhookOutcome::PermanentlyFailed,
        }
    }

    async fn run(&self, event: &WebhookEvent) -> Result<Handled, PipelineError> {
        match self.handle(event).await {
            Ok(handled) => {
                self.mark(event).await;
                Ok(handled)
            }
            Err(e) if e.is_data_integrity() => {
                self.mark(event).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn mark(&self, event: &WebhookEvent) {
        match self.ledger.mark_as_processed(&event.id, &event.event_type).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(event_id = %event.id, "event recorded concurrently by another delivery"),
            Err(e) => tracing::warn!(event_id = %event.id, error = %e, "failed to record processed event"),
        }
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<Handled, PipelineError> {
        match event.event_type.as_str() {
            CHECKOUT_SESSION_COMPLETED => self.checkout_completed(event).await,
            SUBSCRIPTION_UPDATED => self.subscription_updated(event).await,
            SUBSCRIPTION_DELETED => {
                let sub = object_subscription_id(event, "id")?;
                self.set_membership_status(&sub, MembershipStatus::Expired, None)
                    .await
            }
            INVOICE_PAYMENT_SUCCEEDED => self.invoice_paid(event).await,
            INVOICE_PAYMENT_FAILED => match event.object_str("subscription") {
                Some(raw) => {
                    let sub = SubscriptionId::new(raw)?;
                    self.set_membership_status(&sub, MembershipStatus::Inactive, None)
                        .await
                }
                None => Ok(Handled::Ignored),
            },
            other => {
                tracing::debug!(event_type = other, "event type not handled");
                Ok(Handled::Ignored)
            }
        }
    }

    async fn checkout_completed(&self, event: &WebhookEvent) -> Result<Handled, PipelineError> {
        let raw = event
            .object_str("id")
            .ok_or_else(|| PipelineError::Validation("checkout event without session id".into()))?;
        let session_id = CheckoutSessionId::new(raw)?;

        // Event payloads do not carry line items; read the expanded session.
        let provider = self.applier.provider();
        let session = self
            .applier
            .provider_call("get checkout session", provider.get_checkout_session(&session_id))
            .await?;

        if !session.is_paid() {
            tracing::info!(session_id = %session_id, payment_status = session.payment_status.as_str(), "checkout completed without payment");
            return Ok(Handled::Ignored);
        }

        let customer_id = session.customer_id()?;
        let outcome = self.applier.reconcile(&session, customer_id).await?;
        match outcome.result {
            Reconciliation::Applied => {
                tracing::info!(session_id = %session_id, product = outcome.product.as_str(), "checkout applied from webhook")
            }
            Reconciliation::AlreadyApplied | Reconciliation::LostRace => {
                tracing::info!(session_id = %session_id, "checkout already applied")
            }
        }
        Ok(Handled::Processed)
    }

    async fn subscription_updated(&self, event: &WebhookEvent) -> Result<Handled, PipelineError> {
        let sub = object_subscription_id(event, "id")?;
        let raw_status = event
            .object_str("status")
            .ok_or_else(|| PipelineError::Validation("subscription event without status".into()))?;
        let status = SubscriptionStatus::try_from(raw_status)?;
        let cancel_scheduled = !event.object()["cancel_at"].is_null();

        match MembershipStatus::from_subscription(status, cancel_scheduled) {
            Some(next) => self.set_membership_status(&sub, next, None).await,
            None => {
                tracing::info!(subscription_id = %sub, status = status.as_str(), "subscription status needs no membership change");
                Ok(Handled::Ignored)
            }
        }
    }

    async fn invoice_paid(&self, event: &WebhookEvent) -> Result<Handled, PipelineError> {
        let Some(raw) = event.object_str("subscription") else {
            return Ok(Handled::Ignored);
        };
        let sub = SubscriptionId::new(raw)?;
        let details = self.applier.fetch_subscription(&sub).await?;
        self.set_membership_status(&sub, MembershipStatus::Active, Some(details.current_period_end))
            .await
    }

    async fn set_membership_status(
        &self,
        sub: &SubscriptionId,
        status: MembershipStatus,
        next_billing: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Handled, PipelineError> {
        let touched = self
            .applier
            .store()
            .update_membership_status(sub, status, next_billing)
            .await?;
        if touched == 0 {
            tracing::info!(subscription_id = %sub, status = status.as_str(), "no membership for subscription yet");
        } else {
            tracing::info!(subscription_id = %sub, status = status.as_str(), "membership status updated");
        }
        Ok(Handled::Processed)
    }
}

impl WebhookDispatcher for WebhookProcessor {
    fn dispatch<'a>(&'a self, event: &'a WebhookEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.ledger.is_processed(&event.id).await {
                return Ok(());
            }
            self.run(event).await.map(|_| ())
        })
    }
}

fn object_subscription_id(event: &WebhookEvent, field: &str) -> Result<SubscriptionId, PipelineError> {
    let raw = event.object_str(field).ok_or_else(|| {
        PipelineError::Validation(format!("{} event without subscription {field}", event.event_type))
    })?;
    SubscriptionId::new(raw)
}
