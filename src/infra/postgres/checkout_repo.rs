use {
    crate::domain::{
        error::PipelineError,
        id::{CheckoutSessionId, PriceId, SubscriptionId},
        product::{ApplyOutcome, CreditPackage},
        provider::BoxFuture,
        store::{CheckoutStore, NewMembership, TrackedMembership},
        subscription::MembershipStatus,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

fn outcome(written: Option<bool>) -> ApplyOutcome {
    match written {
        Some(_) => ApplyOutcome::Applied,
        None => ApplyOutcome::AlreadyApplied,
    }
}

// ── Applied-side-effect predicates ─────────────────────────────────────────

pub async fn has_membership_for_subscription(pool: &PgPool, sub: &str) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM customer_membership_plans WHERE stripe_subscription_id = $1)",
    )
    .bind(sub)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn has_active_membership(
    pool: &PgPool,
    customer_id: Uuid,
    plan_id: Uuid,
) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM customer_membership_plans
            WHERE customer_id = $1 AND membership_plan_id = $2 AND status = 'active'
        )
        "#,
    )
    .bind(customer_id)
    .bind(plan_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn has_active_credit_package(
    pool: &PgPool,
    customer_id: Uuid,
    package_id: Uuid,
) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM customer_active_credit_package
            WHERE customer_id = $1 AND credit_package_id = $2
        )
        "#,
    )
    .bind(customer_id)
    .bind(package_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn program_reservation_paid(
    pool: &PgPool,
    customer_id: Uuid,
    program_id: Uuid,
) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM program_reservations
            WHERE customer_id = $1 AND program_id = $2 AND payment_status = 'paid'
        )
        "#,
    )
    .bind(customer_id)
    .bind(program_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn event_reservation_paid(
    pool: &PgPool,
    customer_id: Uuid,
    event_id: Uuid,
) -> Result<bool, PipelineError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM event_reservations
            WHERE customer_id = $1 AND event_id = $2 AND payment_status = 'paid'
        )
        "#,
    )
    .bind(customer_id)
    .bind(event_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

// ── Product lookups ────────────────────────────────────────────────────────

pub async fn credit_package_by_price(
    pool: &PgPool,
    price: &PriceId,
) -> Result<Option<CreditPackage>, PipelineError> {
    let row = sqlx::query_as::<_, (Uuid, i32, i32)>(
        "SELECT id, credit_allocation, weekly_credit_limit FROM credit_packages WHERE stripe_price_id = $1",
    )
    .bind(price.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, credit_allocation, weekly_credit_limit)| CreditPackage {
        id,
        price_id: price.clone(),
        credit_allocation,
        weekly_credit_limit,
    }))
}

/// `table` is one of the fixed product tables below, never caller input.
async fn id_by_price(pool: &PgPool, table: &'static str, price: &str) -> Result<Option<Uuid>, PipelineError> {
    let id = sqlx::query_scalar::<_, Uuid>(&format!(
        "SELECT id FROM {table} WHERE stripe_price_id = $1"
    ))
    .bind(price)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

pub async fn membership_plan_periods(pool: &PgPool, plan_id: Uuid) -> Result<Option<u32>, PipelineError> {
    let periods = sqlx::query_scalar::<_, Option<i32>>(
        "SELECT amt_periods FROM membership_plans WHERE id = $1",
    )
    .bind(plan_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| PipelineError::UnknownProduct(format!("membership plan {plan_id}")))?;

    Ok(periods.and_then(|p| u32::try_from(p).ok()).filter(|p| *p > 0))
}

// ── Appliers ───────────────────────────────────────────────────────────────

/// Relies on the partial unique indexes on `stripe_subscription_id` and on
/// active `(customer_id, membership_plan_id)`.
pub async fn enroll_membership(pool: &PgPool, m: &NewMembership) -> Result<ApplyOutcome, PipelineError> {
    let inserted = sqlx::query_scalar::<_, bool>(
        r#"
        INSERT INTO customer_membership_plans
            (id, customer_id, membership_plan_id, status, stripe_subscription_id, next_billing_date, cancel_at)
        VALUES ($1, $2, $3, 'active', $4, $5, $6)
        ON CONFLICT DO NOTHING
        RETURNING true
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(m.customer_id)
    .bind(m.plan_id)
    .bind(m.subscription_id.as_ref().map(|s| s.as_str()))
    .bind(m.next_billing_date)
    .bind(m.cancel_at)
    .fetch_optional(pool)
    .await?;

    Ok(outcome(inserted))
}

/// Marker first: credits move only if this transaction created the marker.
pub async fn allocate_credit_package(
    pool: &PgPool,
    customer_id: Uuid,
    package: &CreditPackage,
    session_id: &CheckoutSessionId,
) -> Result<ApplyOutcome, PipelineError> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query_scalar::<_, bool>(
        r#"
        INSERT INTO customer_active_credit_package
            (customer_id, credit_package_id, weekly_credit_limit, checkout_session_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (customer_id, credit_package_id) DO NOTHING
        RETURNING true
        "#,
    )
    .bind(customer_id)
    .bind(package.id)
    .bind(package.weekly_credit_limit)
    .bind(session_id.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    if claimed.is_none() {
        tx.commit().await?;
        return Ok(ApplyOutcome::AlreadyApplied);
    }

    add_credits(
        &mut tx,
        customer_id,
        package.credit_allocation,
        &format!("Credit package purchase ({session_id})"),
    )
    .await?;

    tx.commit().await?;
    Ok(ApplyOutcome::Applied)
}

pub async fn add_credits(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    customer_id: Uuid,
    amount: i32,
    description: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        INSERT INTO customer_credits (customer_id, credits)
        VALUES ($1, $2)
        ON CONFLICT (customer_id)
        DO UPDATE SET credits = customer_credits.credits + EXCLUDED.credits, updated_at = now()
        "#,
    )
    .bind(customer_id)
    .bind(amount)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO credit_transactions (id, customer_id, amount, transaction_type, description)
        VALUES ($1, $2, $3, 'purchase', $4)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(customer_id)
    .bind(amount)
    .bind(description)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Inserts the reservation as paid, or flips an unpaid one. A row that is
/// already paid is left alone and reported as `AlreadyApplied`.
async fn confirm_reservation(
    pool: &PgPool,
    table: &'static str,
    key: &'static str,
    customer_id: Uuid,
    target_id: Uuid,
) -> Result<ApplyOutcome, PipelineError> {
    let written = sqlx::query_scalar::<_, bool>(&format!(
        r#"
        INSERT INTO {table} (customer_id, {key}, payment_status)
        VALUES ($1, $2, 'paid')
        ON CONFLICT (customer_id, {key})
        DO UPDATE SET payment_status = 'paid', updated_at = now()
        WHERE {table}.payment_status <> 'paid'
        RETURNING true
        "#
    ))
    .bind(customer_id)
    .bind(target_id)
    .fetch_optional(pool)
    .await?;

    Ok(outcome(written))
}

// ── Customer and membership state ──────────────────────────────────────────

pub async fn store_provider_customer_id(
    pool: &PgPool,
    customer_id: Uuid,
    provider_id: &str,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE customers SET stripe_customer_id = $2
        WHERE id = $1 AND (stripe_customer_id IS NULL OR stripe_customer_id = '')
        "#,
    )
    .bind(customer_id)
    .bind(provider_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_membership_status(
    pool: &PgPool,
    sub: &str,
    status: MembershipStatus,
    next_billing_date: Option<DateTime<Utc>>,
) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE customer_membership_plans
        SET status = $2,
            next_billing_date = COALESCE($3, next_billing_date),
            updated_at = now()
        WHERE stripe_subscription_id = $1
        "#,
    )
    .bind(sub)
    .bind(status.as_str())
    .bind(next_billing_date)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn list_tracked_memberships(
    pool: &PgPool,
    limit: u32,
) -> Result<Vec<TrackedMembership>, PipelineError> {
    let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, Option<DateTime<Utc>>)>(
        r#"
        SELECT id, customer_id, stripe_subscription_id, status, next_billing_date
        FROM customer_membership_plans
        WHERE stripe_subscription_id IS NOT NULL
          AND status IN ('active', 'inactive')
        ORDER BY updated_at ASC
        LIMIT $1
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut tracked = Vec::with_capacity(rows.len());
    for (id, customer_id, sub, status, next_billing_date) in rows {
        match (SubscriptionId::new(&sub), MembershipStatus::try_from(status.as_str())) {
            (Ok(subscription_id), Ok(status)) => tracked.push(TrackedMembership {
                id,
                customer_id,
                subscription_id,
                status,
                next_billing_date,
            }),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(membership_id = %id, error = %e, "skipping unreadable membership row")
            }
        }
    }
    Ok(tracked)
}

pub async fn customer_credits(pool: &PgPool, customer_id: Uuid) -> Result<i32, PipelineError> {
    let credits = sqlx::query_scalar::<_, i32>("SELECT credits FROM customer_credits WHERE customer_id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await?;
    Ok(credits.unwrap_or(0))
}

pub struct PgCheckoutStore {
    pool: PgPool,
}

impl PgCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CheckoutStore for PgCheckoutStore {
    fn has_membership_for_subscription<'a>(&'a self, sub: &'a SubscriptionId) -> BoxFuture<'a, bool> {
        Box::pin(has_membership_for_subscription(&self.pool, sub.as_str()))
    }

    fn has_active_membership(&self, customer_id: Uuid, plan_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(has_active_membership(&self.pool, customer_id, plan_id))
    }

    fn has_active_credit_package(&self, customer_id: Uuid, package_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(has_active_credit_package(&self.pool, customer_id, package_id))
    }

    fn program_reservation_paid(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(program_reservation_paid(&self.pool, customer_id, program_id))
    }

    fn event_reservation_paid(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, bool> {
        Box::pin(event_reservation_paid(&self.pool, customer_id, event_id))
    }

    fn credit_package_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<CreditPackage>> {
        Box::pin(credit_package_by_price(&self.pool, price))
    }

    fn program_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(id_by_price(&self.pool, "programs", price.as_str()))
    }

    fn event_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(id_by_price(&self.pool, "events", price.as_str()))
    }

    fn membership_plan_by_price<'a>(&'a self, price: &'a PriceId) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(id_by_price(&self.pool, "membership_plans", price.as_str()))
    }

    fn membership_plan_periods(&self, plan_id: Uuid) -> BoxFuture<'_, Option<u32>> {
        Box::pin(membership_plan_periods(&self.pool, plan_id))
    }

    fn enroll_membership<'a>(&'a self, membership: &'a NewMembership) -> BoxFuture<'a, ApplyOutcome> {
        Box::pin(enroll_membership(&self.pool, membership))
    }

    fn allocate_credit_package<'a>(
        &'a self,
        customer_id: Uuid,
        package: &'a CreditPackage,
        session_id: &'a CheckoutSessionId,
    ) -> BoxFuture<'a, ApplyOutcome> {
        Box::pin(allocate_credit_package(&self.pool, customer_id, package, session_id))
    }

    fn confirm_program_reservation(&self, customer_id: Uuid, program_id: Uuid) -> BoxFuture<'_, ApplyOutcome> {
        Box::pin(confirm_reservation(
            &self.pool,
            "program_reservations",
            "program_id",
            customer_id,
            program_id,
        ))
    }

    fn confirm_event_reservation(&self, customer_id: Uuid, event_id: Uuid) -> BoxFuture<'_, ApplyOutcome> {
        Box::pin(confirm_reservation(
            &self.pool,
            "event_reservations",
            "event_id",
            customer_id,
            event_id,
        ))
    }

    fn store_provider_customer_id<'a>(&'a self, customer_id: Uuid, provider_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(store_provider_customer_id(&self.pool, customer_id, provider_id))
    }

    fn update_membership_status<'a>(
        &'a self,
        sub: &'a SubscriptionId,
        status: MembershipStatus,
        next_billing_date: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, u64> {
        Box::pin(update_membership_status(
            &self.pool,
            sub.as_str(),
            status,
            next_billing_date,
        ))
    }

    fn list_tracked_memberships(&self, limit: u32) -> BoxFuture<'_, Vec<TrackedMembership>> {
        Box::pin(list_tracked_memberships(&self.pool, limit))
    }

    fn customer_credits(&self, customer_id: Uuid) -> BoxFuture<'_, i32> {
        Box::pin(customer_credits(&self.pool, customer_id))
    }
}
