use {
    crate::domain::{
        checkout::{CheckoutMode, CheckoutSession},
        error::PipelineError,
        id::SubscriptionId,
        product::{ApplyOutcome, ProductKind},
        provider::PaymentProvider,
        store::{CheckoutStore, NewMembership},
        subscription::SubscriptionDetails,
    },
    chrono::{DateTime, Utc},
    std::{future::Future, sync::Arc, time::Duration},
    uuid::Uuid,
};

/// Result of running a paid session through the shared reconcile path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The side effect was already in the database before we looked.
    AlreadyApplied,
    /// This call wrote the side effect.
    Applied,
    /// Another path wrote it between our check and our write.
    LostRace,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub customer_id: Uuid,
    pub product: ProductKind,
    pub result: Reconciliation,
}

/// The single write path for checkout side effects, shared by the webhook
/// handler, the synchronous verifier and the sweep.
pub struct CheckoutApplier {
    store: Arc<dyn CheckoutStore>,
    provider: Arc<dyn PaymentProvider>,
    provider_timeout: Duration,
}

impl CheckoutApplier {
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        provider: Arc<dyn PaymentProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            provider_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckoutStore> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.provider
    }

    /// Runs a provider call under the configured timeout.
    pub async fn provider_call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        tokio::time::timeout(self.provider_timeout, fut)
            .await
            .map_err(|_| PipelineError::Timeout(what.to_string()))?
    }

    pub async fn fetch_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<SubscriptionDetails, PipelineError> {
        self.provider_call("get subscription", self.provider.get_subscription(id))
            .await
    }

    /// Identifies what the session bought.
    ///
    /// Subscription checkouts use `membershipPlanID` metadata, falling back to
    /// the plan priced by a line item. Payment checkouts prefer a credit
    /// package on any line item, then a program, then an event.
    pub async fn resolve_product(
        &self,
        session: &CheckoutSession,
    ) -> Result<ProductKind, PipelineError> {
        match session.mode {
            CheckoutMode::Subscription => {
                if let Some(plan_id) = session.membership_plan_id()? {
                    return Ok(ProductKind::Membership { plan_id });
                }
                for price in session.price_ids() {
                    if let Some(plan_id) = self.store.membership_plan_by_price(price).await? {
                        return Ok(ProductKind::Membership { plan_id });
                    }
                }
            }
            CheckoutMode::Payment => {
                for price in session.price_ids() {
                    if let Some(package) = self.store.credit_package_by_price(price).await? {
                        return Ok(ProductKind::CreditPackage(package));
                    }
                }
                for price in session.price_ids() {
                    if let Some(program_id) = self.store.program_by_price(price).await? {
                        return Ok(ProductKind::Program(program_id));
                    }
                }
                if let Some(event_id) = session.event_id() {
                    return Ok(ProductKind::Event(event_id));
                }
                for price in session.price_ids() {
                    if let Some(event_id) = self.store.event_by_price(price).await? {
                        return Ok(ProductKind::Event(event_id));
                    }
                }
            }
            CheckoutMode::Setup => {}
        }

        Err(PipelineError::UnknownProduct(format!(
            "could not identify product for {} checkout {}",
            session.mode.as_str(),
            session.id
        )))
    }

    /// Whether the side effect for this purchase is already in the database.
    pub async fn is_applied(
        &self,
        session: &CheckoutSession,
        customer_id: Uuid,
        product: &ProductKind,
    ) -> Result<bool, PipelineError> {
        match product {
            ProductKind::Membership { plan_id } => {
                if let Some(sub) = &session.subscription
                    && self.store.has_membership_for_subscription(sub).await?
                {
                    return Ok(true);
                }
                self.store.has_active_membership(customer_id, *plan_id).await
            }
            ProductKind::CreditPackage(package) => {
                self.store
                    .has_active_credit_package(customer_id, package.id)
                    .await
            }
            ProductKind::Program(program_id) => {
                self.store
                    .program_reservation_paid(customer_id, *program_id)
                    .await
            }
            ProductKind::Event(event_id) => {
                self.store.event_reservation_paid(customer_id, *event_id).await
            }
        }
    }

    #[tracing::instrument(skip_all, fields(session_id = %session.id, customer_id = %customer_id, product = product.as_str()))]
    pub async fn apply(
        &self,
        session: &CheckoutSession,
        customer_id: Uuid,
        product: &ProductKind,
    ) -> Result<ApplyOutcome, PipelineError> {
        if let Some(provider_customer) = session.customer.as_deref()
            && self
                .store
                .store_provider_customer_id(customer_id, provider_customer)
                .await?
        {
            tracing::info!(provider_customer, "stored provider customer id");
        }

        let outcome = match product {
            ProductKind::Membership { plan_id } => {
                self.apply_membership(session, customer_id, *plan_id).await?
            }
            ProductKind::CreditPackage(package) => {
                self.store
                    .allocate_credit_package(customer_id, package, &session.id)
                    .await?
            }
            ProductKind::Program(program_id) => {
                self.store
                    .confirm_program_reservation(customer_id, *program_id)
                    .await?
            }
            ProductKind::Event(event_id) => {
                self.store
                    .confirm_event_reservation(customer_id, *event_id)
                    .await?
            }
        };

        match outcome {
            ApplyOutcome::Applied => tracing::info!("checkout side effect applied"),
            ApplyOutcome::AlreadyApplied => {
                tracing::info!("checkout side effect already applied by a concurrent path")
            }
        }
        Ok(outcome)
    }

    /// Predicate then apply for a paid session. Unpaid sessions are the
    /// caller's concern.
    pub async fn reconcile(
        &self,
        session: &CheckoutSession,
        customer_id: Uuid,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let product = self.resolve_product(session).await?;
        self.reconcile_product(session, customer_id, product).await
    }

    /// `reconcile` for a product the caller already resolved.
    pub async fn reconcile_product(
        &self,
        session: &CheckoutSession,
        customer_id: Uuid,
        product: ProductKind,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let result = if self.is_applied(session, customer_id, &product).await? {
            Reconciliation::AlreadyApplied
        } else {
            match self.apply(session, customer_id, &product).await? {
                ApplyOutcome::Applied => Reconciliation::Applied,
                ApplyOutcome::AlreadyApplied => Reconciliation::LostRace,
            }
        };

        Ok(ReconcileOutcome {
            customer_id,
            product,
            result,
        })
    }

    /// Enrolls first, then schedules the fixed-term cancellation. A failed
    /// cancel-date push is logged and never undoes or fails the enrollment.
    async fn apply_membership(
        &self,
        session: &CheckoutSession,
        customer_id: Uuid,
        plan_id: Uuid,
    ) -> Result<ApplyOutcome, PipelineError> {
        let sub_id = session.subscription.as_ref().ok_or_else(|| {
            PipelineError::Validation(format!(
                "subscription checkout {} has no subscription",
                session.id
            ))
        })?;

        let subscription = self.fetch_subscription(sub_id).await?;
        let periods = self.store.membership_plan_periods(plan_id).await?;

        let fixed_term_end = match (periods, subscription.billing_cycle) {
            (Some(periods), Some(cycle)) if periods > 0 => {
                Some(cycle.cancel_at(session.created_at, periods)?)
            }
            _ => None,
        };

        let outcome = self
            .store
            .enroll_membership(&NewMembership {
                customer_id,
                plan_id,
                subscription_id: Some(sub_id.clone()),
                next_billing_date: Some(subscription.current_period_end),
                cancel_at: fixed_term_end.or(subscription.cancel_at),
            })
            .await?;

        if outcome == ApplyOutcome::Applied
            && let Some(cancel_at) = fixed_term_end
            && subscription.cancel_at.map(|c| c.timestamp()) != Some(cancel_at.timestamp())
        {
            self.push_cancel_at(sub_id, cancel_at, periods.unwrap_or_default())
                .await;
        }
        Ok(outcome)
    }

    async fn push_cancel_at(&self, sub_id: &SubscriptionId, cancel_at: DateTime<Utc>, periods: u32) {
        match self
            .provider_call(
                "update subscription cancel_at",
                self.provider.update_subscription_cancel_at(sub_id, cancel_at),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(subscription_id = %sub_id, %cancel_at, periods, "scheduled subscription cancellation")
            }
            Err(e) => tracing::error!(
                subscription_id = %sub_id,
                %cancel_at,
                error = %e,
                "membership enrolled but provider cancel date not set, manual follow-up needed"
            ),
        }
    }
}
