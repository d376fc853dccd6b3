use {
    super::{
        checkout::CheckoutSession,
        error::PipelineError,
        id::{CheckoutSessionId, SubscriptionId},
        subscription::SubscriptionDetails,
    },
    chrono::{DateTime, Utc},
    std::{future::Future, pin::Pin},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PipelineError>> + Send + 'a>>;

/// Read/write access to the payment provider's checkout and billing API.
pub trait PaymentProvider: Send + Sync {
    /// Session with line items expanded.
    fn get_checkout_session<'a>(&'a self, id: &'a CheckoutSessionId) -> BoxFuture<'a, CheckoutSession>;

    /// Sessions with status `complete` created at or after `since`, newest first.
    fn list_completed_checkout_sessions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> BoxFuture<'_, Vec<CheckoutSession>>;

    /// Fails with `ProviderNotFound` when the subscription no longer exists.
    fn get_subscription<'a>(&'a self, id: &'a SubscriptionId) -> BoxFuture<'a, SubscriptionDetails>;

    fn update_subscription_cancel_at<'a>(
        &'a self,
        id: &'a SubscriptionId,
        cancel_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ()>;
}
