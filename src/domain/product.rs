use {super::id::PriceId, uuid::Uuid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditPackage {
    pub id: Uuid,
    pub price_id: PriceId,
    pub credit_allocation: i32,
    pub weekly_credit_limit: i32,
}

/// What a checkout session bought, resolved from metadata and line-item prices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductKind {
    Membership { plan_id: Uuid },
    CreditPackage(CreditPackage),
    Program(Uuid),
    Event(Uuid),
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Membership { .. } => "membership",
            Self::CreditPackage(_) => "credit_package",
            Self::Program(_) => "program",
            Self::Event(_) => "event",
        }
    }
}

/// Result of an applier write. Losing a race to another path is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AlreadyApplied,
}
