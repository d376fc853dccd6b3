use {
    super::applier::CheckoutApplier,
    crate::{
        config::MembershipSweepConfig,
        domain::{
            error::PipelineError,
            store::TrackedMembership,
            subscription::MembershipStatus,
        },
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::sync::Arc,
    tokio::sync::{Mutex, watch},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub checked: usize,
    pub fixed: usize,
    pub errors: usize,
    /// Subscription IDs whose enrollment was corrected.
    pub drifted: Vec<String>,
    pub interrupted: bool,
}

/// Periodic comparison of provider-backed enrollments against the provider's
/// subscription state. Repairs what missed `customer.subscription.*` and
/// `invoice.*` events left behind.
pub struct MembershipSweep {
    applier: Arc<CheckoutApplier>,
    config: MembershipSweepConfig,
    running: Mutex<()>,
}

impl MembershipSweep {
    pub fn new(applier: Arc<CheckoutApplier>, config: MembershipSweepConfig) -> Self {
        Self {
            applier,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MembershipSweepConfig {
        &self.config
    }

    /// One pass over at most `batch_size` enrollments. `None` if a pass is
    /// already running.
    #[tracing::instrument(name = "membership_sweep", skip_all)]
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<DriftReport>, PipelineError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::info!("previous membership sweep still running, skipping");
            return Ok(None);
        };

        let memberships = self
            .applier
            .store()
            .list_tracked_memberships(self.config.batch_size)
            .await?;
        let now = Utc::now();

        let mut report = DriftReport::default();
        for membership in &memberships {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            report.checked += 1;
            match self.repair(membership, now).await {
                Ok(None) => {}
                Ok(Some(status)) => {
                    tracing::info!(
                        subscription_id = %membership.subscription_id,
                        from = membership.status.as_str(),
                        to = status.as_str(),
                        "membership drift fixed"
                    );
                    report.fixed += 1;
                    report.drifted.push(membership.subscription_id.to_string());
                }
                Err(e) => {
                    tracing::warn!(subscription_id = %membership.subscription_id, error = %e, "membership check failed, will retry next run");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            fixed = report.fixed,
            errors = report.errors,
            "membership sweep completed"
        );
        Ok(Some(report))
    }

    /// Writes the corrected state and returns it, or `None` when the
    /// enrollment already agrees with the provider.
    async fn repair(
        &self,
        membership: &TrackedMembership,
        now: DateTime<Utc>,
    ) -> Result<Option<MembershipStatus>, PipelineError> {
        let (mut expected, period_end) = match self
            .applier
            .fetch_subscription(&membership.subscription_id)
            .await
        {
            Ok(sub) => (
                MembershipStatus::expected_for(sub.status),
                Some(sub.current_period_end),
            ),
            Err(PipelineError::ProviderNotFound(_)) => (MembershipStatus::Expired, None),
            Err(e) => return Err(e),
        };

        // Lapsed renewal without a live subscription behind it.
        if expected != MembershipStatus::Active
            && membership.status == MembershipStatus::Active
            && membership.next_billing_date.is_some_and(|d| d < now)
        {
            expected = MembershipStatus::Expired;
        }

        let next_billing = period_end.filter(|_| expected == MembershipStatus::Active);
        let billing_stale = next_billing.is_some_and(|end| {
            membership.next_billing_date.map(|d| d.timestamp()) != Some(end.timestamp())
        });
        if expected == membership.status && !billing_stale {
            return Ok(None);
        }

        tracing::warn!(
            membership_id = %membership.id,
            customer_id = %membership.customer_id,
            stored = membership.status.as_str(),
            expected = expected.as_str(),
            "membership drift detected"
        );
        self.applier
            .store()
            .update_membership_status(&membership.subscription_id, expected, next_billing)
            .await?;
        Ok(Some(expected))
    }
}
