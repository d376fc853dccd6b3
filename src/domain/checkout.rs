use {
    super::{
        error::PipelineError,
        id::{CheckoutSessionId, PriceId, SubscriptionId},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
    uuid::Uuid,
};

const META_USER_ID: &str = "userID";
const META_PLAN_ID: &str = "membershipPlanID";
const META_EVENT_ID: &str = "eventID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
    Setup,
}

impl CheckoutMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Subscription => "subscription",
            Self::Setup => "setup",
        }
    }
}

impl TryFrom<&str> for CheckoutMode {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "payment" => Ok(Self::Payment),
            "subscription" => Ok(Self::Subscription),
            "setup" => Ok(Self::Setup),
            other => Err(PipelineError::Validation(format!(
                "unknown checkout mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Unpaid => "unpaid",
            Self::NoPaymentRequired => "no_payment_required",
        }
    }
}

impl TryFrom<&str> for SessionPaymentStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "paid" => Ok(Self::Paid),
            "unpaid" => Ok(Self::Unpaid),
            "no_payment_required" => Ok(Self::NoPaymentRequired),
            other => Err(PipelineError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub price_id: PriceId,
}

/// Provider-owned checkout session, with line items expanded.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub mode: CheckoutMode,
    pub payment_status: SessionPaymentStatus,
    pub customer: Option<String>,
    pub metadata: HashMap<String, String>,
    pub line_items: Vec<LineItem>,
    pub subscription: Option<SubscriptionId>,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == SessionPaymentStatus::Paid
    }

    /// Internal customer the session was opened for.
    ///
    /// Missing or malformed `userID` metadata is a data problem on our side of
    /// the checkout and is reported as `Validation`.
    pub fn customer_id(&self) -> Result<Uuid, PipelineError> {
        let raw = self
            .metadata
            .get(META_USER_ID)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PipelineError::Validation(format!("session {} has no userID metadata", self.id))
            })?;
        Uuid::parse_str(raw).map_err(|e| {
            PipelineError::Validation(format!("session {} has invalid userID {raw}: {e}", self.id))
        })
    }

    pub fn has_user_id(&self) -> bool {
        self.metadata
            .get(META_USER_ID)
            .is_some_and(|v| !v.is_empty())
    }

    /// Plan named in `membershipPlanID` metadata. Absent is `None`; present
    /// but unreadable is `Validation`, never a silent fallback to price lookup.
    pub fn membership_plan_id(&self) -> Result<Option<Uuid>, PipelineError> {
        let Some(raw) = self.metadata.get(META_PLAN_ID).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        Uuid::parse_str(raw).map(Some).map_err(|e| {
            PipelineError::Validation(format!(
                "session {} has invalid membershipPlanID {raw}: {e}",
                self.id
            ))
        })
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.metadata
            .get(META_EVENT_ID)
            .and_then(|v| Uuid::parse_str(v).ok())
    }

    pub fn price_ids(&self) -> impl Iterator<Item = &PriceId> {
        self.line_items.iter().map(|li| &li.price_id)
    }
}
