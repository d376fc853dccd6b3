use {
    super::{error::PipelineError, id::SubscriptionId},
    chrono::{DateTime, Days, Months, Utc},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Paused => "paused",
        }
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" => Ok(Self::IncompleteExpired),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "unpaid" => Ok(Self::Unpaid),
            "paused" => Ok(Self::Paused),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringInterval {
    Day,
    Week,
    Month,
    Year,
}

impl TryFrom<&str> for RecurringInterval {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            other => Err(PipelineError::Validation(format!(
                "unknown recurring interval: {other}"
            ))),
        }
    }
}

/// Billing cadence of a subscription price (`interval` × `interval_count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingCycle {
    pub interval: RecurringInterval,
    pub interval_count: u32,
}

impl BillingCycle {
    /// End of a fixed-term membership: `periods` billing cycles after `start`.
    ///
    /// Month and year steps clamp to the last day of the target month
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn cancel_at(&self, start: DateTime<Utc>, periods: u32) -> Result<DateTime<Utc>, PipelineError> {
        let steps = periods
            .checked_mul(self.interval_count)
            .ok_or_else(|| PipelineError::Validation("billing period overflow".into()))?;
        let out = match self.interval {
            RecurringInterval::Day => start.checked_add_days(Days::new(steps.into())),
            RecurringInterval::Week => start.checked_add_days(Days::new(u64::from(steps) * 7)),
            RecurringInterval::Month => start.checked_add_months(Months::new(steps)),
            RecurringInterval::Year => steps
                .checked_mul(12)
                .and_then(|m| start.checked_add_months(Months::new(m))),
        };
        out.ok_or_else(|| PipelineError::Validation("cancel date out of range".into()))
    }
}

/// Provider view of a subscription, reduced to what reconciliation needs.
#[derive(Debug, Clone)]
pub struct SubscriptionDetails {
    pub id: SubscriptionId,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub billing_cycle: Option<BillingCycle>,
}

/// Internal membership lifecycle state stored on enrollments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Inactive,
    Canceled,
    Expired,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    /// Membership state implied by a `customer.subscription.updated` event.
    /// A scheduled cancellation wins over the provider status.
    pub fn from_subscription(status: SubscriptionStatus, cancel_scheduled: bool) -> Option<Self> {
        if cancel_scheduled {
            return Some(Self::Canceled);
        }
        match status {
            SubscriptionStatus::Active => Some(Self::Active),
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid => Some(Self::Inactive),
            SubscriptionStatus::Canceled => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Membership state a subscription's provider status implies when no
    /// lifecycle event is at hand. Ended or never-started subscriptions expire.
    pub fn expected_for(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::Active | SubscriptionStatus::Trialing => Self::Active,
            SubscriptionStatus::PastDue | SubscriptionStatus::Unpaid | SubscriptionStatus::Paused => {
                Self::Inactive
            }
            SubscriptionStatus::Canceled
            | SubscriptionStatus::Incomplete
            | SubscriptionStatus::IncompleteExpired => Self::Expired,
        }
    }
}

impl TryFrom<&str> for MembershipStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "canceled" => Ok(Self::Canceled),
            "expired" => Ok(Self::Expired),
            other => Err(PipelineError::Validation(format!(
                "unknown membership status: {other}"
            ))),
        }
    }
}
