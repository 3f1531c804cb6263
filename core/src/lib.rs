//! chase-core: an append-only points ledger with idempotent awards,
//! a "chase the target" progression loop, composite achievements and
//! referral commission accounting.

pub mod achievement;
pub mod award;
pub mod balance;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod idempotency;
pub mod identity;
pub mod payment;
pub mod progression;
pub mod rng;
pub mod store;
pub mod types;

pub use engine::PointsEngine;
pub use error::{LedgerError, LedgerResult};
