pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    config::Config,
    domain::{
        alert::AlertSink,
        provider::PaymentProvider,
        store::{CheckoutStore, WebhookEventStore},
    },
    services::{
        applier::CheckoutApplier, ledger::IdempotencyLedger, membership_sweep::MembershipSweep,
        retry::RetryScheduler, sweep::CheckoutSweep, verify::CheckoutVerifier,
        webhook::WebhookProcessor,
    },
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<IdempotencyLedger>,
    pub retries: Arc<RetryScheduler>,
    pub webhooks: Arc<WebhookProcessor>,
    pub verifier: Arc<CheckoutVerifier>,
    pub sweep: Arc<CheckoutSweep>,
    pub memberships: Arc<MembershipSweep>,
    pub stripe_webhook_secret: Arc<str>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    /// Wires every service around the given collaborators.
    pub fn new(
        config: &Config,
        checkout_store: Arc<dyn CheckoutStore>,
        event_store: Option<Arc<dyn WebhookEventStore>>,
        provider: Arc<dyn PaymentProvider>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let ledger = Arc::new(IdempotencyLedger::new(
            config.ledger.clone(),
            event_store.clone(),
        ));
        let retries = Arc::new(RetryScheduler::new(
            config.retry.clone(),
            alerts.clone(),
            event_store,
        ));
        let applier = Arc::new(CheckoutApplier::new(
            checkout_store,
            provider,
            config.provider_timeout,
        ));

        Self {
            webhooks: Arc::new(WebhookProcessor::new(
                ledger.clone(),
                retries.clone(),
                applier.clone(),
            )),
            verifier: Arc::new(CheckoutVerifier::new(applier.clone(), alerts.clone())),
            memberships: Arc::new(MembershipSweep::new(
                applier.clone(),
                config.membership_sweep.clone(),
            )),
            sweep: Arc::new(CheckoutSweep::new(applier, alerts, config.sweep.clone())),
            ledger,
            retries,
            stripe_webhook_secret: config.stripe_webhook_secret.as_str().into(),
            admin_token: config.admin_token.as_deref().map(Into::into),
        }
    }
}
