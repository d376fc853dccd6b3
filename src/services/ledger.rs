use {
    crate::{
        config::LedgerConfig,
        domain::{error::PipelineError, id::EventId, store::WebhookEventStore},
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::{
        collections::HashMap,
        sync::{Arc, PoisonError, RwLock},
        time::Duration,
    },
    tokio::time::Instant,
};

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub cached_entries: usize,
    pub max_entries: usize,
    pub max_age_secs: u64,
    pub durable: bool,
}

/// Record of fully processed webhook events.
///
/// The in-memory map is a fast path in front of the `webhook_events` table.
/// The table is authoritative: a durable insert conflict means some other
/// delivery already finished the event.
pub struct IdempotencyLedger {
    cache: RwLock<HashMap<EventId, Instant>>,
    durable: Option<Arc<dyn WebhookEventStore>>,
    config: LedgerConfig,
}

impl IdempotencyLedger {
    pub fn new(config: LedgerConfig, durable: Option<Arc<dyn WebhookEventStore>>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            durable,
            config,
        }
    }

    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// A durable read failure is treated as "not processed". The appliers'
    /// own predicates absorb the extra execution.
    pub async fn is_processed(&self, event_id: &EventId) -> bool {
        if self.cached(event_id) {
            return true;
        }

        let Some(store) = &self.durable else {
            return false;
        };

        let since = cutoff(self.config.max_age);
        match store.is_processed_since(event_id, since).await {
            Ok(true) => {
                self.insert_cached(event_id.clone());
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "ledger lookup failed, treating as unprocessed");
                false
            }
        }
    }

    /// Returns `false` when the event was already recorded by someone else.
    pub async fn mark_as_processed(
        &self,
        event_id: &EventId,
        event_type: &str,
    ) -> Result<bool, PipelineError> {
        self.insert_cached(event_id.clone());
        match &self.durable {
            Some(store) => store.insert_processed(event_id, event_type).await,
            None => Ok(true),
        }
    }

    /// Drops cache entries older than `max_age`. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|_, at| now.duration_since(*at) < self.config.max_age);
        before - cache.len()
    }

    /// Deletes durable rows older than the configured retention.
    pub async fn prune_durable(&self) -> Result<u64, PipelineError> {
        match &self.durable {
            Some(store) => store.prune_before(cutoff(self.config.retention)).await,
            None => Ok(0),
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        LedgerStats {
            cached_entries: cache.len(),
            max_entries: self.config.max_entries,
            max_age_secs: self.config.max_age.as_secs(),
            durable: self.durable.is_some(),
        }
    }

    fn cached(&self, event_id: &EventId) -> bool {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(event_id)
            .is_some_and(|at| at.elapsed() < self.config.max_age)
    }

    fn insert_cached(&self, event_id: EventId) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= self.config.max_entries && !cache.contains_key(&event_id) {
            evict_oldest(&mut cache, (self.config.max_entries / 4).max(1));
        }
        cache.insert(event_id, Instant::now());
    }
}

fn evict_oldest(cache: &mut HashMap<EventId, Instant>, count: usize) {
    let mut by_age: Vec<(EventId, Instant)> = cache.iter().map(|(k, v)| (k.clone(), *v)).collect();
    by_age.sort_by_key(|(_, at)| *at);
    for (id, _) in by_age.into_iter().take(count) {
        cache.remove(&id);
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(n: usize) -> EventId {
        EventId::new(format!("evt_{n}")).unwrap()
    }

    fn small(max_entries: usize) -> IdempotencyLedger {
        IdempotencyLedger::in_memory(LedgerConfig {
            max_entries,
            ..LedgerConfig::default()
        })
    }

    #[tokio::test]
    async fn marks_and_reports() {
        let ledger = small(10);
        assert!(!ledger.is_processed(&evt(1)).await);
        assert!(ledger.mark_as_processed(&evt(1), "x").await.unwrap());
        assert!(ledger.is_processed(&evt(1)).await);
        assert_eq!(ledger.stats().cached_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_quarter_at_capacity() {
        let ledger = small(8);
        for n in 0..8 {
            ledger.mark_as_processed(&evt(n), "x").await.unwrap();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        ledger.mark_as_processed(&evt(100), "x").await.unwrap();

        assert_eq!(ledger.stats().cached_entries, 7);
        assert!(!ledger.is_processed(&evt(0)).await);
        assert!(!ledger.is_processed(&evt(1)).await);
        assert!(ledger.is_processed(&evt(2)).await);
        assert!(ledger.is_processed(&evt(100)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_max_age() {
        let ledger = IdempotencyLedger::in_memory(LedgerConfig {
            max_age: Duration::from_secs(60),
            ..LedgerConfig::default()
        });
        ledger.mark_as_processed(&evt(1), "x").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        ledger.mark_as_processed(&evt(2), "x").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!ledger.is_processed(&evt(1)).await);
        assert_eq!(ledger.cleanup_expired(), 1);
        assert!(ledger.is_processed(&evt(2)).await);
    }
}
