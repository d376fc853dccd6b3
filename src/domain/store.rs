use {
    super::{
        id::{CheckoutSessionId, EventId, PriceId, SubscriptionId},
        product::{ApplyOutcome, CreditPackage},
        provider::BoxFuture,
        subscription::MembershipStatus,
        webhook::DeadLetter,
    },
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(Debug, Clone)]
pub struct NewMembership {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub subscription_id: Option<SubscriptionId>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
}

/// Enrollment tied to a provider subscription, as read by the membership
/// drift sweep.
#[derive(Debug, Clone)]
pub struct TrackedMembership {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub subscription_id: SubscriptionId,
    pub status: MembershipStatus,
    pub next_billing_date: Option<DateTime<Utc>>,
}

/// Persistence used by the appliers and the applied-side-effect predicate.
///
/// Every `ApplyOutcome` write is guarded by a uniqueness constraint, so two
/// callers racing on the same purchase see exactly one `Applied`.
pub trait CheckoutStore: Send + Sync {
    fn has_membership_for_subscription<'a>(&'a self, sub: &'a SubscriptionId) -> BoxFuture<'a, bool>;

    fn has_active_membership(&self, customer_id: Uuid, plan_id: Uuid) -> BoxFuture<'_, bool>;

    fn has_active_credit_package(&self, customer_id: Uuid, package_id: Uuid) -> BoxFuture<'_, bool>;

    fn program_reservation_paid(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, bool>;

    fn event_reservation_paid(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, bool>;

    fn credit_package_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<CreditPackage>>;

    fn program_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>>;

    fn event_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>>;

    fn membership_plan_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>>;

    /// Fixed number of billing periods for a plan, `None` for open-ended plans.
    /// An unknown plan is `UnknownProduct`.
    fn membership_plan_periods(&self, plan_id: Uuid) -> BoxFuture<'_, Option<u32>>;

    fn enroll_membership<'a>(&'a self, membership: &'a NewMembership) -> BoxFuture<'a, ApplyOutcome>;

    /// Adds the package's credits, logs the transaction and records the active
    /// package marker, all or nothing.
    fn allocate_credit_package<'a>(
        &'a self,
        customer_id: Uuid,
        package: &'a CreditPackage,
        session_id: &'a CheckoutSessionId,
    ) -> BoxFuture<'a, ApplyOutcome>;

    fn confirm_program_reservation(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, ApplyOutcome>;

    fn confirm_event_reservation(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, ApplyOutcome>;

    /// Sets the provider customer id only when none is stored. Returns whether it was written.
    fn store_provider_customer_id<'a>(&'a self, customer_id: Uuid, provider_id: &'a str) -> BoxFuture<'a, bool>;

    /// Returns the number of enrollments touched.
    fn update_membership_status<'a>(
        &'a self,
        sub: &'a SubscriptionId,
        status: MembershipStatus,
        next_billing_date: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, u64>;

    /// Active or inactive enrollments with a provider subscription, least
    /// recently updated first.
    fn list_tracked_memberships(&self, limit: u32) -> BoxFuture<'_, Vec<TrackedMembership>>;

    fn customer_credits(&self, customer_id: Uuid) -> BoxFuture<'_, i32>;
}

/// Durable half of the idempotency ledger plus the dead-letter table.
pub trait WebhookEventStore: Send + Sync {
    /// `true` if this call recorded the event, `false` if it was already there.
    fn insert_processed<'a>(&'a self, event_id: &'a EventId, event_type: &'a str) -> BoxFuture<'a, bool>;

    fn is_processed_since<'a>(&'a self, event_id: &'a EventId, since: DateTime<Utc>) -> BoxFuture<'a, bool>;

    fn prune_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, u64>;

    fn insert_dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, ()>;
}
