use {
    super::applier::CheckoutApplier,
    crate::{
        config::SweepConfig,
        domain::{
            alert::{Alert, AlertSink, AlertType, ReconciliationAlert},
            checkout::{CheckoutMode, CheckoutSession},
            error::PipelineError,
            product::ApplyOutcome,
            subscription::SubscriptionStatus,
        },
    },
    chrono::Utc,
    serde::Serialize,
    std::sync::Arc,
    tokio::sync::{Mutex, watch},
};

const FAILED_SESSIONS_IN_ALERT: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub errors: usize,
    pub failed_sessions: Vec<String>,
    pub interrupted: bool,
}

enum SessionOutcome {
    Reconciled,
    Skipped,
    Failed(PipelineError),
}

/// Periodic scan of recently completed checkouts for purchases the webhook
/// path never applied.
pub struct CheckoutSweep {
    applier: Arc<CheckoutApplier>,
    alerts: Arc<dyn AlertSink>,
    config: SweepConfig,
    running: Mutex<()>,
}

impl CheckoutSweep {
    pub fn new(applier: Arc<CheckoutApplier>, alerts: Arc<dyn AlertSink>, config: SweepConfig) -> Self {
        Self {
            applier,
            alerts,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// One pass over the lookback window. Returns `None` if another pass is
    /// still in progress. Sessions are handled one at a time and the pass
    /// stops early once `shutdown` flips.
    #[tracing::instrument(name = "checkout_sweep", skip_all)]
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<SweepReport>, PipelineError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("previous sweep still running, skipping");
            return Ok(None);
        };

        let lookback = chrono::Duration::from_std(self.config.lookback)
            .map_err(|e| PipelineError::Config(format!("sweep lookback: {e}")))?;
        let since = Utc::now() - lookback;

        let provider = self.applier.provider();
        let sessions = self
            .applier
            .provider_call(
                "list checkout sessions",
                provider.list_completed_checkout_sessions(since, self.config.page_size),
            )
            .await?;

        let mut report = SweepReport::default();
        for session in &sessions {
            if *shutdown.borrow() {
                tracing::info!(remaining = sessions.len() - report.checked, "shutdown requested, stopping sweep");
                report.interrupted = true;
                break;
            }

            report.checked += 1;
            match self.reconcile_session(session).await {
                SessionOutcome::Reconciled => report.reconciled += 1,
                SessionOutcome::Skipped => report.skipped += 1,
                SessionOutcome::Failed(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "checkout reconciliation failed, will retry next run");
                    report.errors += 1;
                    report.failed_sessions.push(session.id.to_string());
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            reconciled = report.reconciled,
            skipped = report.skipped,
            errors = report.errors,
            "checkout sweep completed"
        );

        if let Some(alert) = summary_alert(&report) {
            self.alerts.send(alert);
        }
        Ok(Some(report))
    }

    async fn reconcile_session(&self, session: &CheckoutSession) -> SessionOutcome {
        if !session.is_paid() {
            return SessionOutcome::Skipped;
        }

        let customer_id = match session.customer_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "skipping session without a usable owner");
                return SessionOutcome::Skipped;
            }
        };

        let product = match self.applier.resolve_product(session).await {
            Ok(p) => p,
            Err(e) if e.is_data_integrity() => {
                tracing::warn!(session_id = %session.id, error = %e, "skipping session with unidentifiable product");
                return SessionOutcome::Skipped;
            }
            Err(e) => return SessionOutcome::Failed(e),
        };

        match self.applier.is_applied(session, customer_id, &product).await {
            Ok(true) => return SessionOutcome::Skipped,
            Ok(false) => {}
            Err(e) => return SessionOutcome::Failed(e),
        }

        if session.mode == CheckoutMode::Subscription
            && let Some(sub_id) = &session.subscription
        {
            match self.applier.fetch_subscription(sub_id).await {
                Ok(sub) if sub.status == SubscriptionStatus::Canceled => {
                    tracing::info!(session_id = %session.id, subscription_id = %sub_id, "subscription already canceled, nothing to enroll");
                    return SessionOutcome::Skipped;
                }
                Ok(_) => {}
                Err(PipelineError::ProviderNotFound(_)) => {
                    tracing::info!(session_id = %session.id, subscription_id = %sub_id, "subscription no longer exists, nothing to enroll");
                    return SessionOutcome::Skipped;
                }
                Err(e) => return SessionOutcome::Failed(e),
            }
        }

        tracing::warn!(session_id = %session.id, customer_id = %customer_id, mode = session.mode.as_str(), "missed checkout detected, reconciling");
        match self.applier.apply(session, customer_id, &product).await {
            Ok(ApplyOutcome::Applied) => {
                tracing::info!(session_id = %session.id, product = product.as_str(), "missed checkout reconciled");
                SessionOutcome::Reconciled
            }
            Ok(ApplyOutcome::AlreadyApplied) => SessionOutcome::Skipped,
            Err(e) if e.is_data_integrity() => {
                tracing::warn!(session_id = %session.id, error = %e, "skipping session with inconsistent data");
                SessionOutcome::Skipped
            }
            Err(e) => SessionOutcome::Failed(e),
        }
    }
}

/// One alert per run, only when something was fixed or something failed.
pub fn summary_alert(report: &SweepReport) -> Option<Alert> {
    let (alert_type, message) = match (report.reconciled, report.errors) {
        (0, 0) => return None,
        (0, errors) => (
            AlertType::ReconciliationFailure,
            format!("Checkout reconciliation: {errors} failed (manual review needed)"),
        ),
        (reconciled, 0) => (
            AlertType::ReconciliationSuccess,
            format!("Checkout reconciliation: {reconciled} missed checkouts recovered"),
        ),
        (reconciled, errors) => (
            AlertType::ReconciliationPartial,
            format!("Checkout reconciliation: {reconciled} recovered, {errors} failed"),
        ),
    };

    let failed = &report.failed_sessions;
    let sessions = if failed.is_empty() {
        String::new()
    } else if failed.len() <= FAILED_SESSIONS_IN_ALERT {
        format!(" Sessions: {}", failed.join(", "))
    } else {
        format!(
            " Sessions: {}... (+{} more)",
            failed[..FAILED_SESSIONS_IN_ALERT].join(", "),
            failed.len() - FAILED_SESSIONS_IN_ALERT
        )
    };

    Some(Alert::Reconciliation(ReconciliationAlert {
        session_id: String::new(),
        customer_id: None,
        alert_type,
        error_message: message + &sessions,
        was_fixed: report.reconciled > 0,
        product: "checkout_reconciliation".into(),
    }))
}
