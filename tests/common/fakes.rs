use {
    chrono::{DateTime, TimeZone, Utc},
    pay_sync::{
        AppState,
        config::{Config, LedgerConfig, MembershipSweepConfig, RetryPolicy, SweepConfig},
        domain::{
            alert::{Alert, AlertSink},
            checkout::{CheckoutMode, CheckoutSession, LineItem, SessionPaymentStatus},
            error::PipelineError,
            id::{CheckoutSessionId, EventId, PriceId, SubscriptionId},
            product::{ApplyOutcome, CreditPackage},
            provider::{BoxFuture, PaymentProvider},
            store::{CheckoutStore, NewMembership, TrackedMembership, WebhookEventStore},
            subscription::{
                BillingCycle, MembershipStatus, RecurringInterval, SubscriptionDetails,
                SubscriptionStatus,
            },
            webhook::DeadLetter,
        },
    },
    std::{
        collections::{HashMap, HashSet},
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    },
    uuid::Uuid,
};

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        bind_addr: "127.0.0.1:0".into(),
        stripe_secret_key: "sk_test".into(),
        stripe_webhook_secret: "whsec_test".into(),
        stripe_api_base: "http://localhost".into(),
        slack_webhook_url: None,
        admin_token: Some("admin-secret".into()),
        provider_timeout: Duration::from_secs(5),
        retry: RetryPolicy::default(),
        ledger: LedgerConfig::default(),
        sweep: SweepConfig::default(),
        membership_sweep: MembershipSweepConfig::default(),
    }
}

// ── Alerts ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SpyAlerts {
    sent: Mutex<Vec<Alert>>,
}

impl SpyAlerts {
    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().clone()
    }
}

impl AlertSink for SpyAlerts {
    fn send(&self, alert: Alert) {
        self.sent.lock().unwrap().push(alert);
    }
}

// ── Provider ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeProvider {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    subscriptions: Mutex<HashMap<String, SubscriptionDetails>>,
    pub cancel_at_updates: Mutex<Vec<(String, DateTime<Utc>)>>,
    pub fail_sessions: AtomicBool,
    pub fail_subscriptions: AtomicBool,
    pub fail_cancel_updates: AtomicBool,
    pub list_delay: Mutex<Option<Duration>>,
    /// Latency added to every single-object call (session, subscription, cancel_at).
    pub call_delay: Mutex<Option<Duration>>,
    pub session_fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn put_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.to_string(), session);
    }

    pub fn put_subscription(&self, sub: SubscriptionDetails) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.to_string(), sub);
    }

    pub fn remove_subscription(&self, id: &str) {
        self.subscriptions.lock().unwrap().remove(id);
    }

    pub fn cancel_updates(&self) -> Vec<(String, DateTime<Utc>)> {
        self.cancel_at_updates.lock().unwrap().clone()
    }

    async fn latency(&self) {
        let delay = *self.call_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl PaymentProvider for FakeProvider {
    fn get_checkout_session<'a>(&'a self, id: &'a CheckoutSessionId) -> BoxFuture<'a, CheckoutSession> {
        Box::pin(async move {
            self.session_fetches.fetch_add(1, Ordering::SeqCst);
            self.latency().await;
            if self.fail_sessions.load(Ordering::SeqCst) {
                return Err(PipelineError::Provider("stripe unavailable".into()));
            }
            self.sessions
                .lock()
                .unwrap()
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| PipelineError::ProviderNotFound(id.to_string()))
        })
    }

    fn list_completed_checkout_sessions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<CheckoutSession>> {
        Box::pin(async move {
            let delay = *self.list_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut sessions: Vec<_> = self
                .sessions
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.created_at >= since)
                .cloned()
                .collect();
            sessions.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
            sessions.truncate(limit as usize);
            Ok(sessions)
        })
    }

    fn get_subscription<'a>(&'a self, id: &'a SubscriptionId) -> BoxFuture<'a, SubscriptionDetails> {
        Box::pin(async move {
            self.latency().await;
            if self.fail_subscriptions.load(Ordering::SeqCst) {
                return Err(PipelineError::Provider("stripe unavailable".into()));
            }
            self.subscriptions
                .lock()
                .unwrap()
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| PipelineError::ProviderNotFound(id.to_string()))
        })
    }

    fn update_subscription_cancel_at<'a>(
        &'a self,
        id: &'a SubscriptionId,
        cancel_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.latency().await;
            if self.fail_cancel_updates.load(Ordering::SeqCst) {
                return Err(PipelineError::Provider("stripe 500".into()));
            }
            if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(id.as_str()) {
                sub.cancel_at = Some(cancel_at);
            }
            self.cancel_at_updates
                .lock()
                .unwrap()
                .push((id.to_string(), cancel_at));
            Ok(())
        })
    }
}

// ── Checkout store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MembershipRow {
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub status: MembershipStatus,
    pub subscription_id: Option<String>,
    pub next_billing_date: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct StoreState {
    plans: HashMap<Uuid, (String, Option<u32>)>,
    packages: HashMap<String, CreditPackage>,
    programs: HashMap<String, Uuid>,
    events: HashMap<String, Uuid>,
    memberships: Vec<MembershipRow>,
    active_packages: HashSet<(Uuid, Uuid)>,
    credits: HashMap<Uuid, i32>,
    credit_log: Vec<(Uuid, i32, String)>,
    program_reservations: HashMap<(Uuid, Uuid), String>,
    event_reservations: HashMap<(Uuid, Uuid), String>,
    provider_customers: HashMap<Uuid, String>,
}

/// In-memory store. Each write checks and mutates under one lock, standing in
/// for the database uniqueness constraints.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    pub fail_writes: AtomicBool,
    /// Sleep inside predicate reads so concurrent callers interleave.
    pub predicate_delay: Mutex<Option<Duration>>,
    pub applied_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn add_plan(&self, price: &str, periods: Option<u32>) -> Uuid {
        let id = Uuid::now_v7();
        self.state
            .lock()
            .unwrap()
            .plans
            .insert(id, (price.to_string(), periods));
        id
    }

    pub fn add_credit_package(&self, price: &str, credits: i32, weekly_limit: i32) -> CreditPackage {
        let package = CreditPackage {
            id: Uuid::now_v7(),
            price_id: PriceId::new(price).unwrap(),
            credit_allocation: credits,
            weekly_credit_limit: weekly_limit,
        };
        self.state
            .lock()
            .unwrap()
            .packages
            .insert(price.to_string(), package.clone());
        package
    }

    pub fn add_program(&self, price: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.state
            .lock()
            .unwrap()
            .programs
            .insert(price.to_string(), id);
        id
    }

    pub fn add_event(&self, price: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.state
            .lock()
            .unwrap()
            .events
            .insert(price.to_string(), id);
        id
    }

    pub fn add_pending_program_reservation(&self, customer: Uuid, program: Uuid) {
        self.state
            .lock()
            .unwrap()
            .program_reservations
            .insert((customer, program), "pending".into());
    }

    pub fn add_membership(&self, row: MembershipRow) {
        self.state.lock().unwrap().memberships.push(row);
    }

    pub fn memberships(&self) -> Vec<MembershipRow> {
        self.state.lock().unwrap().memberships.clone()
    }

    pub fn credits(&self, customer: Uuid) -> i32 {
        self.state
            .lock()
            .unwrap()
            .credits
            .get(&customer)
            .copied()
            .unwrap_or(0)
    }

    pub fn credit_log_len(&self) -> usize {
        self.state.lock().unwrap().credit_log.len()
    }

    pub fn has_package_marker(&self, customer: Uuid, package: Uuid) -> bool {
        self.state
            .lock()
            .unwrap()
            .active_packages
            .contains(&(customer, package))
    }

    pub fn program_reservation(&self, customer: Uuid, program: Uuid) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .program_reservations
            .get(&(customer, program))
            .cloned()
    }

    pub fn event_reservation(&self, customer: Uuid, event: Uuid) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .event_reservations
            .get(&(customer, event))
            .cloned()
    }

    pub fn provider_customer(&self, customer: Uuid) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .provider_customers
            .get(&customer)
            .cloned()
    }

    async fn pause(&self) {
        let delay = *self.predicate_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_writable(&self) -> Result<(), PipelineError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn applied(&self) -> ApplyOutcome {
        self.applied_writes.fetch_add(1, Ordering::SeqCst);
        ApplyOutcome::Applied
    }
}

impl CheckoutStore for MemoryStore {
    fn has_membership_for_subscription<'a>(&'a self, sub: &'a SubscriptionId) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.pause().await;
            let state = self.state.lock().unwrap();
            Ok(state
                .memberships
                .iter()
                .any(|m| m.subscription_id.as_deref() == Some(sub.as_str())))
        })
    }

    fn has_active_membership(&self, customer_id: Uuid, plan_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.pause().await;
            let state = self.state.lock().unwrap();
            Ok(state.memberships.iter().any(|m| {
                m.customer_id == customer_id
                    && m.plan_id == plan_id
                    && m.status == MembershipStatus::Active
            }))
        })
    }

    fn has_active_credit_package(&self, customer_id: Uuid, package_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.has_package_marker(customer_id, package_id))
        })
    }

    fn program_reservation_paid(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.program_reservation(customer_id, program_id).as_deref() == Some("paid"))
        })
    }

    fn event_reservation_paid(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.pause().await;
            Ok(self.event_reservation(customer_id, event_id).as_deref() == Some("paid"))
        })
    }

    fn credit_package_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<CreditPackage>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().packages.get(price.as_str()).cloned()) })
    }

    fn program_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().programs.get(price.as_str()).copied()) })
    }

    fn event_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().events.get(price.as_str()).copied()) })
    }

    fn membership_plan_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .plans
                .iter()
                .find(|(_, (p, _))| p == price.as_str())
                .map(|(id, _)| *id))
        })
    }

    fn membership_plan_periods(&self, plan_id: Uuid) -> BoxFuture<'_, Option<u32>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            state
                .plans
                .get(&plan_id)
                .map(|(_, periods)| *periods)
                .ok_or_else(|| PipelineError::UnknownProduct(format!("membership plan {plan_id}")))
        })
    }

    fn enroll_membership<'a>(&'a self, m: &'a NewMembership) -> BoxFuture<'a, ApplyOutcome> {
        Box::pin(async move {
            self.check_writable()?;
            let mut state = self.state.lock().unwrap();
            let sub = m.subscription_id.as_ref().map(|s| s.to_string());
            let conflict = state.memberships.iter().any(|row| {
                (sub.is_some() && row.subscription_id == sub)
                    || (row.customer_id == m.customer_id
                        && row.plan_id == m.plan_id
                        && row.status == MembershipStatus::Active)
            });
            if conflict {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            state.memberships.push(MembershipRow {
                customer_id: m.customer_id,
                plan_id: m.plan_id,
                status: MembershipStatus::Active,
                subscription_id: sub,
                next_billing_date: m.next_billing_date,
                cancel_at: m.cancel_at,
            });
            drop(state);
            Ok(self.applied())
        })
    }

    fn allocate_credit_package<'a>(
        &'a self,
        customer_id: Uuid,
        package: &'a CreditPackage,
        session_id: &'a CheckoutSessionId,
    ) -> BoxFuture<'a, ApplyOutcome> {
        Box::pin(async move {
            self.check_writable()?;
            let mut state = self.state.lock().unwrap();
            if !state.active_packages.insert((customer_id, package.id)) {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            *state.credits.entry(customer_id).or_insert(0) += package.credit_allocation;
            state.credit_log.push((
                customer_id,
                package.credit_allocation,
                format!("Credit package purchase ({session_id})"),
            ));
            drop(state);
            Ok(self.applied())
        })
    }

    fn confirm_program_reservation(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            self.check_writable()?;
            let mut state = self.state.lock().unwrap();
            let status = state
                .program_reservations
                .entry((customer_id, program_id))
                .or_insert_with(|| "pending".into());
            if status == "paid" {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            *status = "paid".into();
            drop(state);
            Ok(self.applied())
        })
    }

    fn confirm_event_reservation(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, ApplyOutcome> {
        Box::pin(async move {
            self.check_writable()?;
            let mut state = self.state.lock().unwrap();
            let status = state
                .event_reservations
                .entry((customer_id, event_id))
                .or_insert_with(|| "pending".into());
            if status == "paid" {
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            *status = "paid".into();
            drop(state);
            Ok(self.applied())
        })
    }

    fn store_provider_customer_id<'a>(&'a self, customer_id: Uuid, provider_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.provider_customers.contains_key(&customer_id) {
                return Ok(false);
            }
            state
                .provider_customers
                .insert(customer_id, provider_id.to_string());
            Ok(true)
        })
    }

    fn update_membership_status<'a>(
        &'a self,
        sub: &'a SubscriptionId,
        status: MembershipStatus,
        next_billing_date: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, u64> {
        Box::pin(async move {
            self.check_writable()?;
            let mut state = self.state.lock().unwrap();
            let mut touched = 0;
            for row in state
                .memberships
                .iter_mut()
                .filter(|m| m.subscription_id.as_deref() == Some(sub.as_str()))
            {
                row.status = status;
                if next_billing_date.is_some() {
                    row.next_billing_date = next_billing_date;
                }
                touched += 1;
            }
            Ok(touched)
        })
    }

    fn list_tracked_memberships(&self, limit: u32) -> BoxFuture<'_, Vec<TrackedMembership>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            Ok(state
                .memberships
                .iter()
                .enumerate()
                .filter(|(_, m)| matches!(m.status, MembershipStatus::Active | MembershipStatus::Inactive))
                .filter_map(|(i, m)| {
                    Some(TrackedMembership {
                        id: Uuid::from_u128(i as u128 + 1),
                        customer_id: m.customer_id,
                        subscription_id: SubscriptionId::new(m.subscription_id.clone()?).ok()?,
                        status: m.status,
                        next_billing_date: m.next_billing_date,
                    })
                })
                .take(limit as usize)
                .collect())
        })
    }

    fn customer_credits(&self, customer_id: Uuid) -> BoxFuture<'_, i32> {
        Box::pin(async move { Ok(self.credits(customer_id)) })
    }
}

// ── Webhook event store ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryEventStore {
    processed: Mutex<HashMap<String, DateTime<Utc>>>,
    dead: Mutex<Vec<DeadLetter>>,
}

impl MemoryEventStore {
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().unwrap().clone()
    }

    pub fn is_recorded(&self, event_id: &str) -> bool {
        self.processed.lock().unwrap().contains_key(event_id)
    }
}

impl WebhookEventStore for MemoryEventStore {
    fn insert_processed<'a>(&'a self, event_id: &'a EventId, _event_type: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let mut processed = self.processed.lock().unwrap();
            if processed.contains_key(event_id.as_str()) {
                return Ok(false);
            }
            processed.insert(event_id.to_string(), Utc::now());
            Ok(true)
        })
    }

    fn is_processed_since<'a>(&'a self, event_id: &'a EventId, since: DateTime<Utc>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            Ok(self
                .processed
                .lock()
                .unwrap()
                .get(event_id.as_str())
                .is_some_and(|at| *at > since))
        })
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> BoxFuture<'_, u64> {
        Box::pin(async move {
            let mut processed = self.processed.lock().unwrap();
            let before = processed.len();
            processed.retain(|_, at| *at >= cutoff);
            Ok((before - processed.len()) as u64)
        })
    }

    fn insert_dead_letter<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.dead.lock().unwrap().push(letter.clone());
            Ok(())
        })
    }
}

// ── Builders ───────────────────────────────────────────────────────────────

pub fn jan_1_2024() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn payment_session(id: &str, customer: Uuid, price: &str) -> CheckoutSession {
    CheckoutSession {
        id: CheckoutSessionId::new(id).unwrap(),
        mode: CheckoutMode::Payment,
        payment_status: SessionPaymentStatus::Paid,
        customer: Some("cus_test".into()),
        metadata: HashMap::from([("userID".to_string(), customer.to_string())]),
        line_items: vec![LineItem {
            price_id: PriceId::new(price).unwrap(),
        }],
        subscription: None,
        created_at: Utc::now(),
    }
}

pub fn subscription_session(id: &str, customer: Uuid, plan: Uuid, sub: &str) -> CheckoutSession {
    CheckoutSession {
        id: CheckoutSessionId::new(id).unwrap(),
        mode: CheckoutMode::Subscription,
        payment_status: SessionPaymentStatus::Paid,
        customer: Some("cus_test".into()),
        metadata: HashMap::from([
            ("userID".to_string(), customer.to_string()),
            ("membershipPlanID".to_string(), plan.to_string()),
        ]),
        line_items: vec![],
        subscription: Some(SubscriptionId::new(sub).unwrap()),
        created_at: Utc::now(),
    }
}

pub fn monthly_subscription(id: &str, status: SubscriptionStatus) -> SubscriptionDetails {
    SubscriptionDetails {
        id: SubscriptionId::new(id).unwrap(),
        status,
        current_period_end: Utc::now() + chrono::Duration::days(30),
        cancel_at: None,
        billing_cycle: Some(BillingCycle {
            interval: RecurringInterval::Month,
            interval_count: 1,
        }),
    }
}

pub fn provider_membership(
    customer: Uuid,
    sub: &str,
    status: MembershipStatus,
    next_billing_date: Option<DateTime<Utc>>,
) -> MembershipRow {
    MembershipRow {
        customer_id: customer,
        plan_id: Uuid::now_v7(),
        status,
        subscription_id: Some(sub.to_string()),
        next_billing_date,
        cancel_at: None,
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub alerts: Arc<SpyAlerts>,
    pub events: Arc<MemoryEventStore>,
    pub state: AppState,
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let provider = Arc::new(FakeProvider::default());
    let alerts = Arc::new(SpyAlerts::default());
    let events = Arc::new(MemoryEventStore::default());
    let state = AppState::new(
        &config,
        store.clone(),
        Some(events.clone()),
        provider.clone(),
        alerts.clone(),
    );
    Harness {
        store,
        provider,
        alerts,
        events,
        state,
    }
}
