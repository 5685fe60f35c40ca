//! Promolane reward engine.
//!
//! This crate contains the bonus/voucher lifecycle state machine, the
//! per-player queue manager, the wagering accumulator, the expiration sweep,
//! and settlement against the external wallet ledger.
//!
//! ## Concurrency invariants
//! - All mutating operations for one player serialize on that player's lock.
//! - Operations for different players never contend.
//! - The store is the single source of truth: state is re-read under the lock
//!   on every operation, never cached across calls.
//! - At most one instance per player is `active`/`locked` at any observable
//!   point.
//!
//! The primary entrypoint is [`RewardEngine`].

pub mod clock;
pub mod ledger;
pub mod lifecycle;
pub mod store;

mod engine;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod invariant_tests;

pub use clock::{Clock, SystemClock};
pub use engine::{AllowAll, EligibilityPolicy, EngineError, RewardEngine};
pub use ledger::{CreditReason, Ledger, LedgerError, NullLedger};
pub use store::{Key, MemoryStore, Store, StoreError, Value};
