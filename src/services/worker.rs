use {
    super::{
        ledger::IdempotencyLedger,
        membership_sweep::MembershipSweep,
        retry::{RetryScheduler, WebhookDispatcher},
        sweep::CheckoutSweep,
    },
    crate::AppState,
    std::{future::Future, sync::Arc, time::Duration},
    tokio::{
        sync::watch,
        task::JoinSet,
        time::{self, MissedTickBehavior},
    },
};

/// Redispatch due webhook retries every `policy.tick`.
pub async fn run_retry_loop(
    scheduler: Arc<RetryScheduler>,
    dispatcher: Arc<dyn WebhookDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("webhook retry loop started");
    let tick = scheduler.policy().tick;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("webhook retry loop shutting down");
                return;
            }
            _ = time::sleep(tick) => {}
        }

        scheduler.process_due(&dispatcher).await;
    }
}

/// Runs `job` every `period`, first one period after start. A tick that fires
/// while the previous run is still going is skipped; shutdown waits for the
/// current run, which sees the same signal and stops early.
async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) where
    F: Fn(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    tracing::info!(job = name, "periodic job started");
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!(job = name, "periodic job shutting down");
                while current.join_next().await.is_some() {}
                return;
            }
            Some(res) = current.join_next(), if !current.is_empty() => {
                if let Err(e) = res {
                    tracing::error!(job = name, error = %e, "periodic job panicked");
                }
            }
            _ = ticker.tick() => {
                if !current.is_empty() {
                    tracing::warn!(job = name, "previous run still going, skipping tick");
                    continue;
                }
                current.spawn(job(shutdown.clone()));
            }
        }
    }
}

/// Checkout sweep every `SweepConfig::interval`.
pub async fn run_sweep_loop(sweep: Arc<CheckoutSweep>, shutdown: watch::Receiver<bool>) {
    let period = sweep.config().interval;
    run_periodic("checkout_sweep", period, shutdown, move |rx| {
        let sweep = Arc::clone(&sweep);
        async move {
            if let Err(e) = sweep.run_once(&rx).await {
                tracing::error!(error = %e, "checkout sweep failed");
            }
        }
    })
    .await;
}

/// Membership drift sweep every `MembershipSweepConfig::interval`.
pub async fn run_membership_sweep_loop(sweep: Arc<MembershipSweep>, shutdown: watch::Receiver<bool>) {
    let period = sweep.config().interval;
    run_periodic("membership_sweep", period, shutdown, move |rx| {
        let sweep = Arc::clone(&sweep);
        async move {
            if let Err(e) = sweep.run_once(&rx).await {
                tracing::error!(error = %e, "membership sweep failed");
            }
        }
    })
    .await;
}

/// Expire in-memory ledger entries every `cleanup_interval`.
pub async fn run_ledger_cleanup(ledger: Arc<IdempotencyLedger>, mut shutdown: watch::Receiver<bool>) {
    let every = ledger.config().cleanup_interval;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = time::sleep(every) => {}
        }

        match ledger.cleanup_expired() {
            0 => {}
            n => tracing::debug!(count = n, "expired ledger entries dropped"),
        }
    }
}

/// Delete durable ledger rows past retention every `prune_interval`.
pub async fn run_ledger_prune(ledger: Arc<IdempotencyLedger>, mut shutdown: watch::Receiver<bool>) {
    let every = ledger.config().prune_interval;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = time::sleep(every) => {}
        }

        match ledger.prune_durable().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "pruned old webhook events"),
            Err(e) => tracing::error!(error = %e, "webhook event prune failed"),
        }
    }
}

/// Owns every periodic task. Dropping without `stop` leaves tasks running
/// until the runtime shuts down.
pub struct Background {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Background {
    pub fn start(state: &AppState) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let dispatcher: Arc<dyn WebhookDispatcher> = state.webhooks.clone();
        tasks.spawn(run_retry_loop(state.retries.clone(), dispatcher, rx.clone()));
        tasks.spawn(run_sweep_loop(state.sweep.clone(), rx.clone()));
        tasks.spawn(run_membership_sweep_loop(state.memberships.clone(), rx.clone()));
        tasks.spawn(run_ledger_cleanup(state.ledger.clone(), rx.clone()));
        tasks.spawn(run_ledger_prune(state.ledger.clone(), rx));

        Self { shutdown, tasks }
    }

    /// Signals every loop and waits up to `grace` for them to finish.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let drained = time::timeout(grace, async {
            while let Some(res) = self.tasks.join_next().await {
                if let Err(e) = res {
                    tracing::error!(error = %e, "background task panicked");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!("background tasks did not stop in time, aborting");
            self.tasks.abort_all();
        }
    }
}
