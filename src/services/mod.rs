pub mod applier;
pub mod ledger;
pub mod membership_sweep;
pub mod retry;
pub mod sweep;
pub mod verify;
pub mod webhook;
pub mod worker;
