pub mod alert;
pub mod checkout;
pub mod error;
pub mod id;
pub mod product;
pub mod provider;
pub mod store;
pub mod subscription;
pub mod webhook;
