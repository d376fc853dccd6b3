pub mod checkout_repo;
pub mod webhook_event_repo;

pub use {checkout_repo::PgCheckoutStore, webhook_event_repo::PgWebhookEventStore};
