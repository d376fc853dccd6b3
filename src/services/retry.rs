use {
    crate::{
        config::RetryPolicy,
        domain::{
            alert::{Alert, AlertSink, WebhookFailureAlert},
            error::PipelineError,
            id::EventId,
            provider::BoxFuture,
            store::WebhookEventStore,
            webhook::{DeadLetter, WebhookEvent},
        },
    },
    rand::Rng,
    serde::Serialize,
    std::{
        collections::{BTreeMap, HashMap},
        sync::{Arc, Mutex, PoisonError},
        time::Duration,
    },
    tokio::{sync::Semaphore, task::JoinSet, time::Instant},
};

/// Re-runs the event-type handler for a stored event.
pub trait WebhookDispatcher: Send + Sync {
    fn dispatch<'a>(&'a self, event: &'a WebhookEvent) -> BoxFuture<'a, ()>;
}

#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub event: WebhookEvent,
    pub attempt: u32,
    pub next_retry_at: Instant,
    pub last_error: String,
    pub created_at: Instant,
    in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled { attempt: u32, delay: Duration },
    PermanentlyFailed { attempts: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    pub pending: usize,
    pub in_flight: usize,
    pub by_attempt: BTreeMap<u32, usize>,
    pub max_retries: u32,
}

/// In-process exponential-backoff retry queue for failed webhook events.
///
/// At most one attempt per event id. An event whose attempt count exceeds
/// `max_retries` is dropped from the queue, written to the dead-letter table
/// and reported to the alert sink.
pub struct RetryScheduler {
    attempts: Mutex<HashMap<EventId, RetryAttempt>>,
    policy: RetryPolicy,
    alerts: Arc<dyn AlertSink>,
    dead_letters: Option<Arc<dyn WebhookEventStore>>,
}

impl RetryScheduler {
    pub fn new(
        policy: RetryPolicy,
        alerts: Arc<dyn AlertSink>,
        dead_letters: Option<Arc<dyn WebhookEventStore>>,
    ) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            policy,
            alerts,
            dead_letters,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[tracing::instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn schedule_retry(&self, event: &WebhookEvent, error: &str) -> RetryDecision {
        let decision = {
            let mut attempts = self.lock();
            let now = Instant::now();
            let entry = attempts
                .entry(event.id.clone())
                .and_modify(|a| {
                    a.attempt += 1;
                    a.last_error = error.to_string();
                    a.in_flight = false;
                })
                .or_insert_with(|| RetryAttempt {
                    event: event.clone(),
                    attempt: 1,
                    next_retry_at: now,
                    last_error: error.to_string(),
                    created_at: now,
                    in_flight: false,
                });

            if entry.attempt > self.policy.max_retries {
                let attempts_made = entry.attempt;
                attempts.remove(&event.id);
                RetryDecision::PermanentlyFailed {
                    attempts: attempts_made,
                }
            } else {
                let delay = self.next_delay(entry.attempt);
                entry.next_retry_at = now + delay;
                RetryDecision::Scheduled {
                    attempt: entry.attempt,
                    delay,
                }
            }
        };

        match decision {
            RetryDecision::Scheduled { attempt, delay } => {
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error, "webhook retry scheduled");
            }
            RetryDecision::PermanentlyFailed { attempts } => {
                self.give_up(event, error, attempts).await;
            }
        }
        decision
    }

    /// Applies a dispatch result: success or a data problem clears the entry,
    /// anything else is scheduled again.
    pub async fn record_outcome(
        &self,
        event: &WebhookEvent,
        outcome: &Result<(), PipelineError>,
    ) -> Option<RetryDecision> {
        match outcome {
            Ok(()) => {
                self.remove_retry(&event.id);
                None
            }
            Err(e) if e.is_data_integrity() => {
                tracing::warn!(event_id = %event.id, error = %e, "webhook data problem, not retrying");
                self.remove_retry(&event.id);
                None
            }
            Err(e) => Some(self.schedule_retry(event, &e.to_string()).await),
        }
    }

    /// No-op when the event has no pending attempt.
    pub fn remove_retry(&self, event_id: &EventId) {
        if self.lock().remove(event_id).is_some() {
            tracing::info!(event_id = %event_id, "webhook retry cleared");
        }
    }

    pub fn pending(&self, event_id: &EventId) -> Option<RetryAttempt> {
        self.lock().get(event_id).cloned()
    }

    /// Backoff without jitter: `min(max_delay, base * multiplier^(attempt-1))`.
    pub fn unjittered_delay(&self, attempt: u32) -> Duration {
        self.scaled_delay(attempt, 1.0)
    }

    /// Backoff for `attempt` with an independent jitter factor in `[0.75, 1.25]`,
    /// still capped at `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        self.scaled_delay(attempt, jitter)
    }

    fn scaled_delay(&self, attempt: u32, factor: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.policy.base_delay.as_secs_f64() * self.policy.multiplier.powi(exp) * factor;
        let cap = self.policy.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.policy.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Redispatches every attempt whose time has come, at most
    /// `policy.concurrency` at once, and waits for the batch.
    /// Returns the number of events dispatched.
    pub async fn process_due(self: &Arc<Self>, dispatcher: &Arc<dyn WebhookDispatcher>) -> usize {
        let due = self.take_due();
        if due.is_empty() {
            return 0;
        }
        tracing::info!(count = due.len(), "redispatching due webhook retries");

        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let count = due.len();

        for event in due {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let scheduler = Arc::clone(self);
            let dispatcher = Arc::clone(dispatcher);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = dispatcher.dispatch(&event).await;
                scheduler.record_outcome(&event, &outcome).await;
            });
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "retry task panicked");
            }
        }
        count
    }

    pub fn stats(&self) -> RetryStats {
        let attempts = self.lock();
        let mut by_attempt = BTreeMap::new();
        for a in attempts.values() {
            *by_attempt.entry(a.attempt).or_insert(0) += 1;
        }
        RetryStats {
            pending: attempts.len(),
            in_flight: attempts.values().filter(|a| a.in_flight).count(),
            by_attempt,
            max_retries: self.policy.max_retries,
        }
    }

    fn take_due(&self) -> Vec<WebhookEvent> {
        let now = Instant::now();
        let mut attempts = self.lock();
        attempts
            .values_mut()
            .filter(|a| !a.in_flight && a.next_retry_at <= now)
            .map(|a| {
                a.in_flight = true;
                a.event.clone()
            })
            .collect()
    }

    async fn give_up(&self, event: &WebhookEvent, error: &str, attempts: u32) {
        tracing::error!(
            severity = "critical",
            attempts,
            error,
            "webhook permanently failed after max retries"
        );

        if let Some(store) = &self.dead_letters {
            let letter = DeadLetter {
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                payload: event.payload.clone(),
                error_message: error.to_string(),
                attempts,
            };
            if let Err(e) = store.insert_dead_letter(&letter).await {
                tracing::error!(error = %e, "failed to record dead letter");
            }
        }

        self.alerts
            .send(Alert::WebhookPermanentFailure(WebhookFailureAlert {
                event_id: event.id.to_string(),
                event_type: event.event_type.clone(),
                attempts,
                last_error: error.to_string(),
            }));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventId, RetryAttempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
