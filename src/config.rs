use {
    crate::domain::error::PipelineError,
    std::{env, str::FromStr, time::Duration},
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub tick: Duration,
    pub concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            multiplier: 2.0,
            tick: Duration::from_secs(30),
            concurrency: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_age: Duration,
    pub max_entries: usize,
    pub cleanup_interval: Duration,
    pub retention: Duration,
    pub prune_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 3600),
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(7 * 24 * 3600),
            prune_interval: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub lookback: Duration,
    pub page_size: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            lookback: Duration::from_secs(24 * 3600),
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MembershipSweepConfig {
    pub interval: Duration,
    pub batch_size: u32,
}

impl Default for MembershipSweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub slack_webhook_url: Option<String>,
    pub admin_token: Option<String>,
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    pub ledger: LedgerConfig,
    pub sweep: SweepConfig,
    pub membership_sweep: MembershipSweepConfig,
}

impl Config {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();

        let retry_defaults = RetryPolicy::default();
        let sweep_defaults = SweepConfig::default();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: optional("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".into()),
            slack_webhook_url: optional("SLACK_WEBHOOK_URL"),
            admin_token: optional("ADMIN_TOKEN"),
            provider_timeout: Duration::from_secs(parsed("PROVIDER_TIMEOUT_SECS", 30)?),
            retry: RetryPolicy {
                max_retries: parsed("RETRY_MAX_ATTEMPTS", retry_defaults.max_retries)?,
                base_delay: Duration::from_millis(parsed("RETRY_BASE_DELAY_MS", 1_000)?),
                max_delay: Duration::from_secs(parsed("RETRY_MAX_DELAY_SECS", 300)?),
                tick: Duration::from_secs(parsed("RETRY_TICK_SECS", 30)?),
                concurrency: parsed("RETRY_CONCURRENCY", retry_defaults.concurrency)?,
                ..retry_defaults
            },
            ledger: LedgerConfig::default(),
            sweep: SweepConfig {
                interval: Duration::from_secs(parsed("SWEEP_INTERVAL_SECS", 30 * 60)?),
                lookback: Duration::from_secs(parsed::<u64>("SWEEP_LOOKBACK_HOURS", 24)? * 3600),
                ..sweep_defaults
            },
            membership_sweep: MembershipSweepConfig {
                interval: Duration::from_secs(parsed("MEMBERSHIP_SWEEP_INTERVAL_SECS", 15 * 60)?),
                batch_size: parsed("MEMBERSHIP_SWEEP_BATCH_SIZE", 100)?,
            },
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, PipelineError> {
    optional(key).ok_or_else(|| PipelineError::Config(format!("{key} must be set")))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, PipelineError>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| PipelineError::Config(format!("{key}={raw}: {e}"))),
    }
}
