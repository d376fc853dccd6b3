use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

macro_rules! prefixed_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
                let id = id.into();
                if !id.starts_with($prefix) {
                    return Err(PipelineError::Validation(format!(
                        concat!(stringify!($name), " must start with ", $prefix, ", got: {}"),
                        id
                    )));
                }
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }
    };
}

prefixed_id!(
    /// Stripe event identifier (`evt_xxx`).
    EventId,
    "evt_"
);

prefixed_id!(
    /// Checkout session identifier (`cs_xxx`).
    CheckoutSessionId,
    "cs_"
);

prefixed_id!(
    /// Subscription identifier (`sub_xxx`).
    SubscriptionId,
    "sub_"
);

prefixed_id!(
    /// Price identifier (`price_xxx`).
    PriceId,
    "price_"
);
